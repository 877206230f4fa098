use thiserror::Error;

/// Domain error taxonomy returned synchronously to business callers.
///
/// Audit and notification failures never surface through this type; they are
/// logged and swallowed by the component that triggered them.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl WorkflowError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn persistence(source: impl std::fmt::Display) -> Self {
        Self::Persistence(source.to_string())
    }

    /// Message safe to return to callers without leaking internals.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict(_) => "The record changed concurrently. Refresh and retry.",
            Self::Forbidden(_) => "You are not allowed to perform this action.",
            Self::Validation(_) => "The request could not be processed. Check inputs and try again.",
            Self::Configuration(_) | Self::Persistence(_) => {
                "An unexpected internal error occurred."
            }
        }
    }
}
