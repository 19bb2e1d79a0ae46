use canopy_bundle::{BuildError, UploadError};
use canopy_canary::CanaryError;
use canopy_core::ConfigError;
use canopy_edge::EdgeError;
use canopy_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("edge error: {0}")]
    Edge(#[from] EdgeError),

    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    #[error("{0}")]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Canary(#[from] CanaryError),

    #[error("store error: {0}")]
    State(#[from] StateError),

    #[error("background task failed: {0}")]
    Task(String),
}
