//! 4.B: soft (retryable) vs hard failures must be distinguishable.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// Serialization conflict or transient sled failure — the caller
    /// re-executes the whole unit of work (bounded retries upstream).
    #[error("soft database failure: {0}")]
    Soft(String),
    /// Everything else: corruption, IO errors, (de)serialization bugs.
    #[error("hard database failure: {0}")]
    Hard(String),
    #[error("not found")]
    NotFound,
}

impl From<sled::Error> for DbError {
    fn from(e: sled::Error) -> Self {
        match e {
            sled::Error::CollectionNotFound(_) => DbError::Hard(e.to_string()),
            sled::Error::Unsupported(_) => DbError::Hard(e.to_string()),
            sled::Error::ReportableBug(_) => DbError::Hard(e.to_string()),
            sled::Error::Io(_) => DbError::Soft(e.to_string()),
            sled::Error::Corruption { .. } => DbError::Hard(e.to_string()),
            _ => DbError::Hard(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Hard(format!("(de)serialization failure: {e}"))
    }
}

impl<T> From<sled::transaction::TransactionError<T>> for DbError
where
    T: std::fmt::Debug,
{
    fn from(e: sled::transaction::TransactionError<T>) -> Self {
        match e {
            sled::transaction::TransactionError::Abort(inner) => {
                DbError::Soft(format!("transaction aborted: {inner:?}"))
            }
            sled::transaction::TransactionError::Storage(s) => DbError::from(s),
        }
    }
}
