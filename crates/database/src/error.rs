use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Connection pool exhausted: no connection available within {0:?}")]
    PoolExhausted(Duration),

    #[error("Failed to bind connection to namespace {namespace}: {reason}")]
    NamespaceBindingFailed { namespace: String, reason: String },

    #[error("Failed to provision namespace {namespace}: {source}")]
    ProvisioningFailed {
        namespace: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Other(String),
}

impl DatabaseError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::NotFound(format!("{} {} not found", entity, id))
    }

    /// Errors a caller may reasonably retry after a short backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted(_) | Self::NamespaceBindingFailed { .. }
        )
    }
}

// Note: From<sqlx::Error> is implemented via #[from]; acquisition timeouts are
// mapped to PoolExhausted explicitly in Database::acquire.
