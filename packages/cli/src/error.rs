//! Error types for the command-line driver.

use std::path::PathBuf;

use thiserror::Error;
use wasmbox_runtime::RouterError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Runtime(#[from] wasmbox_runtime::Error),

    #[error(transparent)]
    Router(#[from] RouterError),

    /// The stage failed; details were already written to host output.
    #[error("{0} failed")]
    Stage(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
