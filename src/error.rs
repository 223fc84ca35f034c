//! Error taxonomy for the triage core.
//!
//! None of these are fatal. Each call site documents how it recovers:
//! model errors fall back to keyword matching, source errors become an empty
//! (search) or simulated (streaming) batch, and only `TriageError` reaches the
//! HTTP layer.

use thiserror::Error;

/// Failures while loading or evaluating the linear text model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("reading model artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing model artifact {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact shape mismatch: {0}")]
    Shape(String),

    #[error("model produced a non-finite decision value")]
    NonFinite,
}

/// Failures talking to an external tweet-search provider.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited by provider (reset: {reset:?})")]
    RateLimited { reset: Option<i64> },

    #[error("provider error (status {status}): {message}")]
    Status { status: u16, message: String },

    #[error("malformed provider payload: {0}")]
    Payload(String),

    #[error("no credentials configured for {0}")]
    MissingCredentials(&'static str),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout
        } else if err.is_decode() {
            SourceError::Payload(err.to_string())
        } else {
            SourceError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Payload(err.to_string())
    }
}

/// Errors surfaced through the public service API.
#[derive(Debug, Error)]
pub enum TriageError {
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Source(#[from] SourceError),
}

pub type Result<T> = std::result::Result<T, TriageError>;
