use thiserror::Error;

pub type EngageResult<T> = Result<T, EngageError>;

#[derive(Error, Debug)]
pub enum EngageError {
    /// Malformed event, missing user id, invalid rating or amount.
    /// Rejected before anything is persisted.
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Duplicate unlock and similar no-op conditions. Logged, never surfaced
    /// to end users.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngageError {
    pub fn input(msg: impl Into<String>) -> Self {
        EngageError::Input(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        EngageError::StorageUnavailable(msg.into())
    }

    /// Transient failures worth one more attempt on correctness-critical
    /// write paths.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngageError::StorageUnavailable(_))
    }
}

impl From<config::ConfigError> for EngageError {
    fn from(err: config::ConfigError) -> Self {
        EngageError::Config(err.to_string())
    }
}

/// Rejects blank user identifiers.
pub fn require_user_id(user_id: &str) -> EngageResult<()> {
    if user_id.trim().is_empty() {
        return Err(EngageError::input("user id is required"));
    }
    Ok(())
}
