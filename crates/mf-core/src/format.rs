//! Known 3D file formats and the catalog of what the service accepts.
//!
//! The catalog starts from a static table and is extended at startup from
//! whatever the general-purpose converter reports it can read and write.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Description of one file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFormat {
    /// Display name, e.g. `"OBJ"`.
    pub name: String,
    pub description: String,
    pub mimetype: String,
    /// Extension including the leading dot, e.g. `".obj"`.
    pub ext: String,
}

impl FileFormat {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        mimetype: impl Into<String>,
        ext: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            mimetype: mimetype.into(),
            ext: ext.into(),
        }
    }
}

const OCTET_STREAM: &str = "application/octet-stream";

/// Format table plus the ordered lists of accepted input and output formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatCatalog {
    formats: BTreeMap<String, FileFormat>,
    input_formats: Vec<String>,
    output_formats: Vec<String>,
}

impl Default for FormatCatalog {
    fn default() -> Self {
        let table = [
            ("ldr", FileFormat::new("LDR", "LDraw file format", "text/plain", ".ldr")),
            ("3ds", FileFormat::new("3DS", "3D Studio", OCTET_STREAM, ".3ds")),
            ("mpd", FileFormat::new("MPD", "LDraw Multi-Part Documents", "text/plain", ".mpd")),
            ("obj", FileFormat::new("OBJ", "Wavefront OBJ", "text/plain", ".obj")),
            ("blend", FileFormat::new("BLEND", "Blender", OCTET_STREAM, ".blend")),
            ("bvh", FileFormat::new("BVH", "Biovision BVH", "text/plain", ".bvh")),
            ("ply", FileFormat::new("PLY", "Stanford Polygon Library", OCTET_STREAM, ".ply")),
            ("smd", FileFormat::new("SMD", "Studiomdl Data file format", "text/plain", ".smd")),
        ];
        Self {
            formats: table
                .into_iter()
                .map(|(key, format)| (key.to_string(), format))
                .collect(),
            input_formats: vec!["ldr".into(), "mpd".into()],
            output_formats: vec!["3ds".into()],
        }
    }
}

impl FormatCatalog {
    /// Look up a format by its short name (`"obj"`).
    pub fn get(&self, name: &str) -> Option<&FileFormat> {
        self.formats.get(name)
    }

    /// Insert or replace a format entry.
    pub fn insert(&mut self, name: impl Into<String>, format: FileFormat) {
        self.formats.insert(name.into(), format);
    }

    pub fn formats(&self) -> &BTreeMap<String, FileFormat> {
        &self.formats
    }

    pub fn input_formats(&self) -> &[String] {
        &self.input_formats
    }

    pub fn output_formats(&self) -> &[String] {
        &self.output_formats
    }

    pub fn is_input(&self, name: &str) -> bool {
        self.input_formats.iter().any(|f| f == name)
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.output_formats.iter().any(|f| f == name)
    }

    /// Record a format the general converter can write.
    ///
    /// Unknown formats are added to the table; a known format with an empty
    /// description gets `description` filled in.
    pub fn add_output(&mut self, name: &str, ext: &str, description: &str) {
        match self.formats.get_mut(name) {
            Some(existing) => {
                if existing.description.is_empty() {
                    existing.description = description.to_string();
                }
            }
            None => {
                self.formats.insert(
                    name.to_string(),
                    FileFormat::new(name.to_uppercase(), description, OCTET_STREAM, format!(".{ext}")),
                );
            }
        }
        if !self.is_output(name) {
            self.output_formats.push(name.to_string());
        }
    }

    /// Record a format the general converter can read.
    pub fn add_input(&mut self, name: &str, ext: &str) {
        if !self.formats.contains_key(name) {
            let upper = name.to_uppercase();
            self.formats.insert(
                name.to_string(),
                FileFormat::new(upper.clone(), format!("{upper} File Format"), OCTET_STREAM, ext),
            );
        }
        if !self.is_input(name) {
            self.input_formats.push(name.to_string());
        }
    }

    /// Guess a format from a filename's extension, case-insensitively.
    pub fn derive_format(&self, filename: &str) -> Option<(&str, &FileFormat)> {
        let lower = filename.to_lowercase();
        self.formats
            .iter()
            .find(|(_, format)| !format.ext.is_empty() && lower.ends_with(&format.ext))
            .map(|(name, format)| (name.as_str(), format))
    }

    /// MIME type for a format, falling back to `application/octet-stream`.
    pub fn mimetype(&self, name: &str) -> &str {
        self.formats
            .get(name)
            .map(|f| f.mimetype.as_str())
            .unwrap_or(OCTET_STREAM)
    }

    /// Extension for a format, falling back to `.<name>`.
    pub fn extension(&self, name: &str) -> String {
        self.formats
            .get(name)
            .map(|f| f.ext.clone())
            .unwrap_or_else(|| format!(".{name}"))
    }
}
