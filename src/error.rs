use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dumper error: {0}")]
    Dumper(#[from] DumperError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DumperError {
    #[error("Unknown dumper '{name}'. Supported: {supported:?}")]
    UnknownDumper {
        name: String,
        supported: Vec<String>,
    },
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("Failed to connect to remote {addr}: {source}")]
    ConnectFailed { addr: String, source: io::Error },

    #[error("Stream error: {0}")]
    Stream(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
