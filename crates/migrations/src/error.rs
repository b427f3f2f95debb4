use gymdesk_database::DatabaseError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MigrationError>;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Invalid migration artifact {artifact}: {reason}")]
    MigrationArtifactInvalid { artifact: String, reason: String },

    #[error("Migration {version} ({name}) failed on {namespace}: {source}")]
    MigrationExecutionFailed {
        namespace: String,
        version: i64,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Migration {version} ({name}) on {namespace} has drifted: recorded hash {recorded}, current hash {current}")]
    MigrationDrift {
        namespace: String,
        version: i64,
        name: String,
        recorded: String,
        current: String,
    },

    #[error("Failed to read migration source: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl MigrationError {
    pub fn invalid(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MigrationArtifactInvalid {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::Database(DatabaseError::from(err))
    }
}
