//! Choosing the chain of converters for a format pair.
//!
//! Two backends are involved: a specialized one (LDraw) with a narrow
//! capability set and a fixed intermediate format, and a general one (assimp)
//! that handles everything else. Rules, in order:
//!
//! 1. specialized handles input→output: one specialized stage;
//! 2. specialized reads the input but cannot write the output: specialized to
//!    its intermediate format, then general to the output;
//! 3. otherwise: one general stage.

use std::sync::Arc;

use mf_core::{Error, Result};

use crate::backend::Backend;

/// One step of a conversion pipeline.
#[derive(Debug, Clone)]
pub struct Stage {
    pub backend: Arc<dyn Backend>,
    /// Format this stage writes.
    pub output_format: String,
}

impl Stage {
    fn new(backend: &Arc<dyn Backend>, output_format: &str) -> Self {
        Self {
            backend: Arc::clone(backend),
            output_format: output_format.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSelector {
    specialized: Arc<dyn Backend>,
    general: Arc<dyn Backend>,
}

impl PipelineSelector {
    pub fn new(specialized: Arc<dyn Backend>, general: Arc<dyn Backend>) -> Self {
        Self {
            specialized,
            general,
        }
    }

    pub fn specialized(&self) -> &Arc<dyn Backend> {
        &self.specialized
    }

    pub fn general(&self) -> &Arc<dyn Backend> {
        &self.general
    }

    /// Ordered stages converting `input` into `output`.
    pub fn select(&self, input: &str, output: &str) -> Result<Vec<Stage>> {
        let special = self.specialized.capabilities();
        let general = self.general.capabilities();

        if !special.accepts(input) && !general.accepts(input) {
            return Err(Error::unsupported_source(input));
        }
        if !special.produces(output) && !general.produces(output) {
            return Err(Error::unsupported_destination(output));
        }

        if special.supports(input, output) {
            return Ok(vec![Stage::new(&self.specialized, output)]);
        }

        if special.accepts(input) {
            let Some(intermediate) = special.intermediate_format.as_deref() else {
                return Err(Error::unsupported_destination(output));
            };
            if !general.supports(intermediate, output) {
                return Err(Error::unsupported_destination(output));
            }
            return Ok(vec![
                Stage::new(&self.specialized, intermediate),
                Stage::new(&self.general, output),
            ]);
        }

        // The input check above guarantees the general backend reads `input`.
        if !general.produces(output) {
            return Err(Error::unsupported_destination(output));
        }
        Ok(vec![Stage::new(&self.general, output)])
    }
}
