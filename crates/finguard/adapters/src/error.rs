//! Adapter error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Non-success response from the gateway
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
}

pub type AdapterResult<T> = Result<T, AdapterError>;
