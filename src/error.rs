use thiserror::Error;

/// Main error type for the support core
///
/// Quota outcomes (rate window or token budget exhausted) are not errors;
/// they are reported through [`crate::rate_limit::RateLimitDecision`].
#[derive(Debug, Error)]
pub enum SupportError {
    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Database connection or query error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The store refused a record it will never accept (constraint or data violation)
    #[error("Record rejected: {0}")]
    RejectedRecord(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Background write queue error
    #[error("Write queue error: {0}")]
    QueueError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SupportError {
    /// Check if error is related to the persistent store
    pub fn is_database_error(&self) -> bool {
        matches!(self, SupportError::DatabaseError(_))
    }

    /// Check if the store rejected the record itself; retrying it cannot succeed
    pub fn is_rejected_record(&self) -> bool {
        matches!(self, SupportError::RejectedRecord(_))
    }

    /// Check if error is a configuration problem
    pub fn is_config_error(&self) -> bool {
        matches!(self, SupportError::ConfigError(_))
    }

    /// Transient failures are retried on the next cycle instead of surfacing
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SupportError::DatabaseError(_) | SupportError::QueueError(_) | SupportError::IoError(_)
        )
    }

    /// Get error type as string for logging
    pub fn error_type(&self) -> &'static str {
        match self {
            SupportError::InvalidRequest(_) => "invalid_request",
            SupportError::DatabaseError(_) => "database_error",
            SupportError::RejectedRecord(_) => "rejected_record",
            SupportError::ConfigError(_) => "config_error",
            SupportError::QueueError(_) => "queue_error",
            SupportError::IoError(_) => "io_error",
            SupportError::SerializationError(_) => "serialization_error",
            SupportError::Internal(_) => "internal_error",
        }
    }
}

/// Result type alias for support core operations
pub type SupportResult<T> = Result<T, SupportError>;
