use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeliosError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{entity} with id {id} was not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("{0}")]
    Other(String),
}

/// Failure of a call to an external collaborator (HTTP API, repository backend).
///
/// Every operation that returns this error must be safe to retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    /// Classify a failed HTTP call; `timeout` is the per-request bound that
    /// was in effect.
    pub fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            Self::Timeout(timeout)
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}
