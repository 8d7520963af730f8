//! Error types for object store access

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The storage endpoint refused the token, typically because it expired
    #[error("Token rejected: {0}")]
    TokenRejected(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
