//! Error types for canary deployments.

use thiserror::Error;

use canopy_core::ConfigError;

#[derive(Debug, Error)]
pub enum CanaryError {
    /// Another deployment holds the active slot.
    #[error("deployment '{active}' is still in progress")]
    Conflict { active: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no active deployment '{0}'")]
    NotFound(String),

    #[error("deployment task failed: {0}")]
    TaskFailed(String),
}
