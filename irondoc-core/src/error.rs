// src/error.rs
//! Crate-wide error type.

use thiserror::Error;

use crate::storage::{PageId, TransactionId};

#[derive(Debug, Error)]
pub enum IronDocError {
    /// Write-write or read-write conflict detected at validation time.
    /// Retryable: roll back and run the whole transaction again.
    #[error("write conflict: transaction {transaction_id} on page {page_id}")]
    Conflict {
        transaction_id: TransactionId,
        page_id: PageId,
    },

    #[error("transaction still conflicting after {max_retries} retries")]
    MaxRetriesExceeded { max_retries: u32 },

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("query not supported: {0}")]
    NotSupportedInQuery(String),

    #[error("no index registered for field '{0}'")]
    IndexNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transaction {0} is no longer active")]
    TransactionClosed(TransactionId),

    #[error("storage corruption: {0}")]
    Corruption(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IronDocError {
    /// Only conflicts are worth retrying; everything else is a caller or data error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IronDocError::Conflict { .. })
    }

    pub fn is_conflict(&self) -> bool {
        self.is_retryable()
    }
}

impl From<serde_json::Error> for IronDocError {
    fn from(err: serde_json::Error) -> Self {
        IronDocError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for IronDocError {
    fn from(err: bincode::Error) -> Self {
        IronDocError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for IronDocError {
    fn from(err: toml::de::Error) -> Self {
        IronDocError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IronDocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_are_retryable() {
        let conflict = IronDocError::Conflict {
            transaction_id: TransactionId(7),
            page_id: PageId(3),
        };
        assert!(conflict.is_retryable());
        assert_eq!(conflict.to_string(), "write conflict: transaction 7 on page 3");

        assert!(!IronDocError::DuplicateKey("x".into()).is_retryable());
        assert!(!IronDocError::MaxRetriesExceeded { max_retries: 5 }.is_retryable());
        assert!(!IronDocError::NotSupportedInQuery("Select".into()).is_retryable());
    }
}
