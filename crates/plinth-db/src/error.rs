//! Database-specific error types and conversions.

use plinth_core::error::PlinthError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Unique constraint violated on {index}")]
    Conflict { index: String },

    #[error("Database '{0}' does not exist")]
    UnknownDatabase(String),

    #[error("Database server unreachable: {0}")]
    Unreachable(String),

    #[error("Timed out after {secs}s waiting for a session on '{database}'")]
    Timeout { database: String, secs: u64 },

    #[error("Invalid database name: {0}")]
    InvalidName(String),
}

impl DbError {
    /// Classify a failed statement, recognising unique index violations.
    pub(crate) fn from_statement(err: impl std::fmt::Display) -> Self {
        let message = err.to_string();
        if message.contains("already contains") {
            let index = message
                .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .find(|word| word.starts_with("idx_"));
            if let Some(index) = index {
                return DbError::Conflict {
                    index: index.to_string(),
                };
            }
        }
        DbError::Query(message)
    }
}

impl From<DbError> for PlinthError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => PlinthError::NotFound { entity, id },
            DbError::UnknownDatabase(database) => PlinthError::UnknownTenantDatabase { database },
            DbError::Unreachable(msg) => PlinthError::DatabaseUnreachable(msg),
            err @ DbError::Timeout { .. } => PlinthError::DatabaseUnreachable(err.to_string()),
            err @ DbError::InvalidName(_) => PlinthError::Validation {
                message: err.to_string(),
            },
            other => PlinthError::Database(other.to_string()),
        }
    }
}
