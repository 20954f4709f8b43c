//! Digest-based identifiers.
//!
//! Both identifiers are lowercase hex SHA-256 digests wrapped in newtypes so a
//! task fingerprint can never be passed where a content hash is expected.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Error returned when parsing a digest identifier from a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid digest: {0:?}")]
pub struct InvalidDigest(pub String);

/// Generate a newtype over a lowercase hex digest string.
///
/// The macro produces a struct with:
/// - `from_digest()` to wrap raw digest bytes
/// - `as_str()` to borrow the hex form
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `Ord`, `Serialize`, `Deserialize`
/// - `Display` and `FromStr` (which rejects anything that is not lowercase hex)
macro_rules! digest_id {
    ($($(#[doc = $doc:expr])* $name:ident),+ $(,)?) => {
        $(
            $(#[doc = $doc])*
            #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(String);

            impl $name {
                /// Wrap raw digest bytes.
                #[must_use]
                pub fn from_digest(bytes: &[u8]) -> Self {
                    Self(hex::encode(bytes))
                }

                /// Borrow the hex form.
                #[must_use]
                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl FromStr for $name {
                type Err = InvalidDigest;

                fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                    let valid = !s.is_empty()
                        && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
                    if valid {
                        Ok(Self(s.to_string()))
                    } else {
                        Err(InvalidDigest(s.to_string()))
                    }
                }
            }

            impl AsRef<str> for $name {
                fn as_ref(&self) -> &str {
                    &self.0
                }
            }
        )+
    };
}

digest_id! {
    /// Identity of a conversion request, used to coalesce duplicates.
    Fingerprint,
    /// Hash of a stored file's content; also its filename in the store.
    ContentHash,
}

impl Fingerprint {
    /// Digest a sequence of parts, NUL-separated so that `("ab", "c")` and
    /// `("a", "bc")` never collide.
    #[must_use]
    pub fn of_parts<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let mut hasher = Sha256::new();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                hasher.update([0u8]);
            }
            hasher.update(part.as_ref());
        }
        Self::from_digest(&hasher.finalize())
    }
}
