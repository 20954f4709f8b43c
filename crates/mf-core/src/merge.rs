//! Metadata tree and recursive merge.
//!
//! Store entries carry a small tree of mappings. The merge is a pure function
//! over that tree: serde is only used to move it in and out of sidecar files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level metadata mapping.
pub type Metadata = BTreeMap<String, MetaValue>;

/// A value in the metadata tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    /// Borrow the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the map payload, if any.
    pub fn as_map(&self) -> Option<&BTreeMap<String, MetaValue>> {
        match self {
            MetaValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::String(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::String(s)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        MetaValue::Bool(b)
    }
}

impl From<i64> for MetaValue {
    fn from(n: i64) -> Self {
        MetaValue::Integer(n)
    }
}

impl From<Metadata> for MetaValue {
    fn from(m: Metadata) -> Self {
        MetaValue::Map(m)
    }
}

/// Merge `new` over `old`.
///
/// For every key present on either side: when both sides hold a map the two
/// are merged recursively, otherwise the value from `new` wins if `new` has
/// the key at all. Merging the result with `new` again yields the same
/// result.
pub fn merge(old: &Metadata, new: &Metadata) -> Metadata {
    let mut out = old.clone();
    for (key, new_value) in new {
        let merged = match (out.get(key), new_value) {
            (Some(MetaValue::Map(a)), MetaValue::Map(b)) => MetaValue::Map(merge(a, b)),
            _ => new_value.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}
