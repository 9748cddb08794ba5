//! Error types for the enhancement tracker.

use thiserror::Error;

use crate::model::{ItemId, Status};

#[derive(Debug, Error)]
pub enum Error {
    #[error("work item not found: {0}")]
    NotFound(ItemId),

    /// The item is no longer held by this worker. The caller's work is stale.
    #[error("work item {item} is not owned by worker {worker}")]
    NotOwner { item: ItemId, worker: String },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: Status, to: Status },

    /// Store busy, locked, or unreachable. Back off and retry the whole operation.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(#[source] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

// SQLite primary result codes that mean "try again later".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CANTOPEN: i32 = 14;

fn is_unavailable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            // extended codes carry the primary code in the low byte
            .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED | SQLITE_CANTOPEN))
            .unwrap_or(false),
        _ => false,
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if is_unavailable(&err) {
            Error::StoreUnavailable(err)
        } else {
            Error::Storage(err)
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        match err {
            sqlx::migrate::MigrateError::Execute(e) => e.into(),
            other => Error::Other(format!("migration failed: {other}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_transient() {
        let err: Error = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn io_failure_is_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "gone");
        let err: Error = sqlx::Error::Io(io).into();
        assert!(err.is_transient());
    }

    #[test]
    fn missing_row_is_not_transient() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, Error::Storage(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn not_owner_names_item_and_worker() {
        let err = Error::NotOwner {
            item: ItemId::from("src/lib.rs"),
            worker: "w1".to_string(),
        };
        assert_eq!(err.to_string(), "work item src/lib.rs is not owned by worker w1");
        assert!(!err.is_transient());
    }
}
