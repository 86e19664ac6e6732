pub mod classify;
pub mod config;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod pool;
pub mod postgres;
pub mod repositories;
pub mod retry;

pub use classify::{classify, ErrorClass, RetryReason};
pub use config::DatabaseConfig;
pub use ledger::{
    FillService, FillTransaction, LedgerConnection, LedgerSummary, LedgerTransaction, LockedOrder,
};
pub use memory::{Fault, MemoryConnection, MemoryLedger, MemoryManager, MemoryTransaction};
pub use pool::{ConnectionPool, ManageConnection, PoolConfig, PoolStatus, PooledConnection};
pub use postgres::{PgConnectionManager, PgLedgerConnection, PgLedgerTransaction};
pub use retry::{run_with_retries, RetryPolicy};

use std::io::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error ({}): {message}", .code.as_deref().unwrap_or("no sqlstate"))]
    Database {
        /// Five-character SQLSTATE reported by the server
        code: Option<String>,
        message: String,
    },

    #[error("Transport error: {message}")]
    Io { kind: ErrorKind, message: String },

    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Invalid fill: {0}")]
    InvalidFill(String),

    #[error("Timed out waiting for a pooled connection")]
    PoolTimedOut,

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("No working database connection after {attempts} attempts")]
    PoolUnavailable { attempts: u32 },
}

impl DatabaseError {
    /// Server error carrying a SQLSTATE
    pub fn sqlstate(code: &str, message: impl Into<String>) -> Self {
        DatabaseError::Database {
            code: Some(code.to_string()),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            DatabaseError::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn classify(&self) -> ErrorClass {
        classify(self)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.classify(), ErrorClass::Retryable(_))
    }

    /// Whether the connection that produced this error should not be reused.
    ///
    /// Class 57 only counts for the `57P` shutdown codes; a `57014` statement
    /// cancellation leaves the session usable.
    pub fn is_connection_error(&self) -> bool {
        match self {
            DatabaseError::Io { .. } | DatabaseError::Connection(_) => true,
            DatabaseError::Database { .. } => match self.classify() {
                ErrorClass::Retryable(RetryReason::ConnectionException) => true,
                ErrorClass::Retryable(RetryReason::OperatorIntervention) => {
                    self.code().is_some_and(|code| code.starts_with("57P"))
                }
                _ => false,
            },
            _ => false,
        }
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => DatabaseError::Database {
                code: db.code().map(|c| c.into_owned()),
                message: db.message().to_string(),
            },
            sqlx::Error::Io(e) => DatabaseError::Io {
                kind: e.kind(),
                message: e.to_string(),
            },
            sqlx::Error::Tls(e) => DatabaseError::Io {
                kind: ErrorKind::Other,
                message: e.to_string(),
            },
            sqlx::Error::Protocol(msg) => DatabaseError::Connection(msg),
            sqlx::Error::PoolTimedOut => DatabaseError::PoolTimedOut,
            sqlx::Error::PoolClosed => DatabaseError::PoolClosed,
            other => DatabaseError::Query(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::Migration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_cancel_keeps_session() {
        let cancelled = DatabaseError::sqlstate("57014", "canceling statement due to statement timeout");
        assert!(cancelled.is_retryable());
        assert!(!cancelled.is_connection_error());
    }

    #[test]
    fn test_connection_loss_discards_session() {
        assert!(DatabaseError::sqlstate("08006", "connection failure").is_connection_error());
        assert!(DatabaseError::sqlstate("57P01", "terminating connection due to administrator command")
            .is_connection_error());
        assert!(DatabaseError::Io {
            kind: ErrorKind::UnexpectedEof,
            message: "SSL SYSCALL error: EOF detected".to_string(),
        }
        .is_connection_error());
        assert!(!DatabaseError::sqlstate("40P01", "deadlock detected").is_connection_error());
        assert!(!DatabaseError::sqlstate("23505", "duplicate key").is_connection_error());
    }
}
