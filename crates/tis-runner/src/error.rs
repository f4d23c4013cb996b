//! Error types for tisctl.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tis_engine::EngineError;

/// Errors that end a tisctl command.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The config file is not valid YAML for [`RunnerConfig`](crate::RunnerConfig).
    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Socket setup failed.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A command-line value could not be interpreted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The Ctrl-C handler could not be installed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    /// Output could not be serialized.
    #[error("failed to format output: {0}")]
    Output(#[from] serde_json::Error),

    /// The metrics exporter could not start.
    #[error("metrics exporter: {0}")]
    Metrics(String),
}

/// Result type for tisctl.
pub type Result<T> = std::result::Result<T, RunnerError>;
