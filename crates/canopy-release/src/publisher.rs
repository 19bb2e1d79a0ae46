//! Endpoint publishing.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use canopy_state::{Parameter, ParameterStore};

/// The endpoint could not be recorded. Serving is unaffected.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("endpoint not published to {parameter}: {reason}")]
pub struct PublishWarning {
    pub parameter: String,
    pub reason: String,
}

/// Writes the site's public address to one named parameter.
#[derive(Clone)]
pub struct EndpointPublisher {
    store: Arc<dyn ParameterStore>,
    parameter_name: String,
}

impl EndpointPublisher {
    pub fn new(store: Arc<dyn ParameterStore>, parameter_name: &str) -> Self {
        Self {
            store,
            parameter_name: parameter_name.to_string(),
        }
    }

    pub fn parameter_name(&self) -> &str {
        &self.parameter_name
    }

    /// Overwrite the parameter with `domain_name`.
    pub fn publish(&self, domain_name: &str) -> Result<Parameter, PublishWarning> {
        let domain_name = domain_name.trim();
        if domain_name.is_empty() {
            return Err(self.warning("domain name is empty".to_string()));
        }
        match self.store.put_parameter(&self.parameter_name, domain_name) {
            Ok(parameter) => {
                info!(
                    parameter = %parameter.name,
                    value = %parameter.value,
                    version = parameter.version,
                    "endpoint published"
                );
                Ok(parameter)
            }
            Err(e) => Err(self.warning(e.to_string())),
        }
    }

    /// The currently published address, if any.
    pub fn current(&self) -> Option<String> {
        match self.store.get_parameter(&self.parameter_name) {
            Ok(parameter) => parameter.map(|p| p.value),
            Err(e) => {
                warn!(parameter = %self.parameter_name, error = %e, "endpoint lookup failed");
                None
            }
        }
    }

    fn warning(&self, reason: String) -> PublishWarning {
        let warning = PublishWarning {
            parameter: self.parameter_name.clone(),
            reason,
        };
        warn!(%warning, "endpoint publish skipped");
        warning
    }
}
