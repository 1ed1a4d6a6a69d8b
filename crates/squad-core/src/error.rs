//! Error Types

use thiserror::Error;

/// Result type alias for routing operations
pub type Result<T> = std::result::Result<T, SquadError>;

/// Squad error types
#[derive(Error, Debug)]
pub enum SquadError {
    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider reported it is overloaded (transient, retried by the classifier)
    #[error("Provider overloaded: {0}")]
    Overloaded(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Model output could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// Classification failed after retries, or returned an unusable result
    #[error("Classification failed: {reason}")]
    Classification { user_message: String, reason: String },

    /// The selected agent failed while producing its turn
    #[error("Agent '{agent_id}' failed: {reason}")]
    AgentExecution {
        agent_id: String,
        user_message: String,
        reason: String,
    },

    /// Conversation storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// A required component was requested but never configured
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl SquadError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::Overloaded(_) | Self::RateLimited(_) | Self::Io(_)
        )
    }

    /// Whether the backend signalled overload. Only this condition is retried
    /// by the classifier.
    pub const fn is_overloaded(&self) -> bool {
        matches!(self, Self::Overloaded(_))
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Classification { user_message, .. }
            | Self::AgentExecution { user_message, .. } => user_message.clone(),
            Self::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            Self::ProviderUnavailable(_) | Self::Overloaded(_) => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            Self::RateLimited(_) => "You've made too many requests. Please wait a moment.".into(),
            Self::Auth(_) => "Authentication failed. Please check your credentials.".into(),
            Self::NotConfigured(_) | Self::Config(_) => "Service configuration error.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for SquadError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
