//! Conversion requests and their fingerprints.

use bytes::Bytes;
use mf_core::{Error, Fingerprint, FormatCatalog, Result};
use reqwest::Url;

/// Where the model to convert comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionSource {
    /// Downloaded by the worker.
    Uri(String),
    /// Uploaded with the request.
    Inline(Bytes),
}

/// A request to convert one model between two formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub input_format: String,
    pub output_format: String,
    pub source: ConversionSource,
    /// Put the result in the content store instead of handing out a path.
    pub cache_result: bool,
}

impl ConversionRequest {
    pub fn from_uri(
        input_format: impl Into<String>,
        output_format: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            input_format: input_format.into(),
            output_format: output_format.into(),
            source: ConversionSource::Uri(uri.into()),
            cache_result: false,
        }
    }

    pub fn from_bytes(
        input_format: impl Into<String>,
        output_format: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            input_format: input_format.into(),
            output_format: output_format.into(),
            source: ConversionSource::Inline(data.into()),
            cache_result: false,
        }
    }

    pub fn cached(mut self, cache_result: bool) -> Self {
        self.cache_result = cache_result;
        self
    }

    /// Identity used to coalesce duplicate requests.
    ///
    /// Covers the format pair and the source, not the cache flag.
    pub fn fingerprint(&self) -> Fingerprint {
        let (kind, payload): (&str, &[u8]) = match &self.source {
            ConversionSource::Uri(uri) => ("uri", uri.as_bytes()),
            ConversionSource::Inline(data) => ("data", &data[..]),
        };
        Fingerprint::of_parts([
            self.input_format.as_bytes(),
            self.output_format.as_bytes(),
            kind.as_bytes(),
            payload,
        ])
    }

    /// Reject requests that cannot possibly be fetched.
    pub fn validate(&self) -> Result<()> {
        match &self.source {
            ConversionSource::Uri(uri) => {
                let url = Url::parse(uri)
                    .map_err(|e| Error::Validation(format!("invalid URI {uri}: {e}")))?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(Error::Validation(format!(
                        "unsupported URI scheme {}",
                        url.scheme()
                    )));
                }
            }
            ConversionSource::Inline(data) if data.is_empty() => {
                return Err(Error::Validation("Data missing in POST request".into()));
            }
            ConversionSource::Inline(_) => {}
        }
        Ok(())
    }

    /// Path component of the source URI, if any.
    pub fn uri_path(&self) -> Option<String> {
        match &self.source {
            ConversionSource::Uri(uri) => Url::parse(uri).ok().map(|u| u.path().to_string()),
            ConversionSource::Inline(_) => None,
        }
    }

    /// Prefix and suffix for the downloaded input file.
    ///
    /// Taken from the last segment of the URI path (`car.ldr` gives
    /// `("car", ".ldr")`), otherwise `"output"` plus the input format's
    /// extension.
    pub fn temp_affixes(&self, catalog: &FormatCatalog) -> (String, String) {
        let tail = self
            .uri_path()
            .and_then(|p| p.rsplit('/').next().map(str::to_owned))
            .filter(|t| !t.is_empty());
        match tail {
            Some(tail) => match tail.rfind('.') {
                Some(dot) if dot > 0 => (tail[..dot].to_string(), tail[dot..].to_string()),
                _ => (tail, String::new()),
            },
            None => ("output".to_string(), catalog.extension(&self.input_format)),
        }
    }
}
