//! Application-wide error types.
//!
//! [`AppError`] covers startup and infrastructure failures.  [`ValidationError`]
//! is raised at component boundaries when malformed input tries to enter a
//! running conversation; it is never retried.

use thiserror::Error;

use crate::llm::ProviderError;
use crate::subsystems::agents::AgentError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("memory error: {0}")]
    Memory(String),

    #[error("comms error: {0}")]
    Comms(String),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed input crossing a component boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("message for '{to}' cannot be queued by agent '{agent}'")]
    Misaddressed { agent: String, to: String },

    #[error("message from '{from}' has no token count")]
    Unmeasured { from: String },

    #[error("{0}")]
    Invalid(String),
}

impl ValidationError {
    pub fn empty(field: &'static str) -> Self {
        ValidationError::Empty { field }
    }
}
