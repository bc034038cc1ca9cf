use std::{path::PathBuf, process::ExitStatus};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to write job script {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("cannot render `--{flag}`: {reason}")]
    Unrenderable { flag: String, reason: String },

    #[error("unknown algorithm `{0}`")]
    UnknownAlgorithm(String),

    #[error("invalid option `{key}` for algorithm `{algorithm}`: {reason}")]
    InvalidOption {
        algorithm: String,
        key: String,
        reason: String,
    },
}
