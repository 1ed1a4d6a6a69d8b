//! # squad-runtime
//!
//! HTTP model providers for agent-squad.
//!
//! ## Providers
//!
//! - **Ollama** (default): local inference via `/api/chat`
//! - **OpenAI-compatible** (default): any `/chat/completions` server
//!
//! Backend overload (HTTP 503/529) surfaces as `SquadError::Overloaded`, which
//! the classifier retries.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use squad_runtime::OllamaProvider;
//!
//! let provider = Arc::new(OllamaProvider::from_env()?);
//! let agent = LlmAgent::builder()
//!     .name("Tech Agent")
//!     .description("Hardware and software troubleshooting")
//!     .provider(provider)
//!     .build()?;
//! ```

pub mod error;
mod http;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

pub use error::RuntimeError;

#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};

#[cfg(feature = "openai")]
pub use openai::{OpenAiConfig, OpenAiProvider};

// Re-export core types for convenience
pub use squad_core::{GenerationOptions, LlmProvider, Message, Result, Role, SquadError};
