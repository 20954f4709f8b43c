//! Application context shared across route handlers via Axum state.

use std::sync::Arc;

use mf_convert::ConversionService;
use mf_core::config::Config;

/// Cheap to clone; everything inside is behind an `Arc`.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub service: Arc<ConversionService>,
    pub config: Arc<Config>,
}

impl AppContext {
    pub fn new(service: Arc<ConversionService>, config: Config) -> Self {
        Self {
            service,
            config: Arc::new(config),
        }
    }
}
