use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SprocketError>;

#[derive(Debug, Error)]
pub enum SprocketError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid query: {0}")]
    Query(String),
    #[error("invalid output format: {0}")]
    OutputFormat(String),
    #[error("{command} failed: {message}")]
    Command { command: String, message: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<toml::de::Error> for SprocketError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SprocketError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SprocketError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
