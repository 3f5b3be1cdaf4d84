use thiserror::Error;

/// Regent-specific error types
#[derive(Debug, Error)]
pub enum RegentError {
    #[error("Instance not found: {key}")]
    InstanceNotFound { key: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Promotion failed on {failed}: {reason}")]
    Promotion { failed: String, reason: String },

    #[error("Process exited with status {status}: {command}")]
    ProcessFailed { command: String, status: i32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<String> for RegentError {
    fn from(msg: String) -> Self {
        RegentError::Internal(msg)
    }
}

impl From<&str> for RegentError {
    fn from(msg: &str) -> Self {
        RegentError::Internal(msg.to_string())
    }
}

impl RegentError {
    pub fn instance_not_found<S: Into<String>>(key: S) -> Self {
        RegentError::InstanceNotFound { key: key.into() }
    }

    pub fn store<S: Into<String>>(msg: S) -> Self {
        RegentError::Store(msg.into())
    }

    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        RegentError::Configuration(msg.into())
    }

    pub fn promotion<S: Into<String>, R: Into<String>>(failed: S, reason: R) -> Self {
        RegentError::Promotion {
            failed: failed.into(),
            reason: reason.into(),
        }
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        RegentError::Internal(msg.into())
    }
}

/// Result type for regent operations
pub type RegentResult<T> = Result<T, RegentError>;
