use std::sync::Arc;
use std::time::Duration;

use mf_core::{Error, FormatCatalog, Result};
use mf_store::Storage;

use crate::selector::PipelineSelector;

/// Everything a conversion task needs besides its request.
#[derive(Debug)]
pub struct ConversionContext {
    pub storage: Arc<Storage>,
    pub selector: PipelineSelector,
    pub formats: FormatCatalog,
    pub http: reqwest::Client,
}

impl ConversionContext {
    pub fn new(storage: Arc<Storage>, selector: PipelineSelector, formats: FormatCatalog) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("meshforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            storage,
            selector,
            formats,
            http,
        })
    }
}
