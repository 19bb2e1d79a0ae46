//! Error types for the edge.

use std::time::Duration;

use thiserror::Error;

use canopy_core::ConfigError;
use canopy_state::StateError;

use crate::origin::OriginRef;

#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("route table has no default route (/*)")]
    MissingDefaultRoute,

    #[error("duplicate route pattern '{0}'")]
    DuplicatePattern(String),

    #[error("route '{pattern}' references unregistered origin {origin}")]
    UnregisteredOrigin { pattern: String, origin: OriginRef },

    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid cache policy: {0}")]
    InvalidCachePolicy(String),

    #[error("origin '{0}' is already registered")]
    DuplicateOrigin(String),

    #[error("origin {0} is not registered")]
    UnknownOrigin(OriginRef),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("alias '{alias}' of '{function}' points at unpublished version v{version}")]
    UnpublishedVersion {
        function: String,
        alias: String,
        version: u64,
    },

    #[error("compute invocation failed: {0}")]
    Invoke(String),

    #[error("compute invocation timed out after {0:?}")]
    Timeout(Duration),

    #[error("object store error: {0}")]
    Store(#[from] StateError),
}

impl EdgeError {
    /// Whether this error means the route table was rejected at construction.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingDefaultRoute
                | Self::DuplicatePattern(_)
                | Self::UnregisteredOrigin { .. }
                | Self::InvalidPattern { .. }
                | Self::InvalidCachePolicy(_)
                | Self::DuplicateOrigin(_)
                | Self::UnknownOrigin(_)
                | Self::UnpublishedVersion { .. }
                | Self::Config(_)
        )
    }
}
