//! Configuration errors shared by every Canopy crate.

use thiserror::Error;

/// A configuration value was rejected before anything was built.
///
/// Construction-time validation never applies a partial configuration:
/// callers either get a fully valid value or one of these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid duration '{0}'")]
    InvalidDuration(String),

    #[error("traffic weight {0} is outside [0, 1]")]
    InvalidWeight(f64),

    #[error("canary fraction {0} must be between 0.001 and 0.999")]
    InvalidCanaryFraction(f64),

    #[error("bake window must be greater than zero")]
    ZeroBakeWindow,

    #[error("unknown preset '{0}'")]
    UnknownPreset(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read config: {0}")]
    Read(String),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
