//! Transport-level errors and their mapping onto [`SquadError`].

use squad_core::SquadError;
use thiserror::Error;

/// Failures talking to a model backend over HTTP
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Could not connect to the backend
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request did not finish in time
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Body could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),

    /// Backend reported an error inside a successful response
    #[error("backend error: {0}")]
    Backend(String),

    /// Any other transport failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for RuntimeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<RuntimeError> for SquadError {
    fn from(err: RuntimeError) -> Self {
        let message = err.to_string();
        match err {
            RuntimeError::Http { status: 503 | 529, .. } => Self::Overloaded(message),
            RuntimeError::Http { status: 429, .. } => Self::RateLimited(message),
            RuntimeError::Http { status: 401 | 403, .. } => Self::Auth(message),
            RuntimeError::Http { .. } | RuntimeError::Backend(_) | RuntimeError::Transport(_) => {
                Self::Provider(message)
            }
            RuntimeError::Connect(_) | RuntimeError::Timeout(_) => Self::ProviderUnavailable(message),
            RuntimeError::Decode(_) => Self::Parse(message),
        }
    }
}
