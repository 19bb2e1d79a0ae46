use std::path::PathBuf;

use canopy_state::StateError;
use thiserror::Error;

/// The build produced nothing that may be uploaded.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("working directory {0} does not exist")]
    WorkingDir(PathBuf),

    #[error("failed to prepare build environment: {0}")]
    Environment(#[source] std::io::Error),

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", exit_status(.exit_code))]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("build output directory {0} is missing")]
    MissingOutput(PathBuf),

    #[error("failed to read build output at {path}: {reason}")]
    Capture { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
#[error("upload of {key} failed after {attempts} attempt(s): {source}")]
pub struct UploadError {
    pub key: String,
    pub attempts: u32,
    #[source]
    pub source: StateError,
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}
