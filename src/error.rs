//! Error taxonomy shared by the graph store, chat store, and search paths.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors surfaced by store and search operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed arguments rejected at the boundary.
    #[error("validation error: {0}")]
    Validation(String),

    /// A uniqueness or reference constraint rejected a write. Nothing from the
    /// offending batch was committed.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A record required by the operation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The embedding provider failed.
    #[error("embedding provider error: {0}")]
    Upstream(String),

    #[error("database error: {0}")]
    Database(rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, msg)
                if code.code == ErrorCode::ConstraintViolation =>
            {
                Error::ConstraintViolation(
                    msg.clone().unwrap_or_else(|| "constraint failed".to_string()),
                )
            }
            _ => Error::Database(err),
        }
    }
}

impl Error {
    /// Wrap an embedding provider failure, keeping the full cause chain in the message.
    pub fn upstream(err: anyhow::Error) -> Self {
        Error::Upstream(format!("{err:#}"))
    }

    /// Short machine-readable kind, used as a prefix on tool error text.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::ConstraintViolation(_) => "constraint_violation",
            Error::NotFound(_) => "not_found",
            Error::Upstream(_) => "upstream_provider_error",
            Error::Database(_) => "database_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Result alias for store and search operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn unique_failure_maps_to_constraint_violation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (name TEXT UNIQUE)").unwrap();
        conn.execute("INSERT INTO t (name) VALUES ('a')", []).unwrap();

        let err: Error = conn
            .execute("INSERT INTO t (name) VALUES ('a')", [])
            .unwrap_err()
            .into();

        assert!(matches!(err, Error::ConstraintViolation(_)));
        assert_eq!(err.kind(), "constraint_violation");
    }

    #[test]
    fn other_sqlite_failures_stay_database_errors() {
        let conn = Connection::open_in_memory().unwrap();
        let err: Error = conn.execute("SELECT * FROM missing", []).unwrap_err().into();
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn upstream_keeps_cause_chain() {
        let cause = anyhow::anyhow!("connection reset").context("embedding request failed");
        let err = Error::upstream(cause);
        let text = err.to_string();
        assert!(text.contains("embedding request failed"));
        assert!(text.contains("connection reset"));
    }
}
