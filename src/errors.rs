//! Error types for the cashier withdrawal engine
//!
//! One taxonomy for everything a withdrawal or admin operation can surface.
//! Retryable settlement faults are handled internally by the poller and are
//! deliberately absent here: callers only ever see the terminal shape.

use thiserror::Error;

/// Root error type for cashier operations
#[derive(Debug, Error)]
pub enum CashierError {
    /// Bad address, bad amount, missing registered address
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Session exists but is not allowed to withdraw
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Global kill switch is active
    #[error("Withdrawals are temporarily disabled for maintenance")]
    Maintenance,

    /// Balance does not cover amount + fee
    #[error("Insufficient balance: need {required} units, have {available}")]
    InsufficientBalance { required: u64, available: u64 },

    /// Node down, house wallet underfunded, or submission blew up
    #[error("Settlement unavailable: {0}")]
    SettlementUnavailable(String),

    /// Terminal on-chain failure after retries were exhausted or ruled out
    #[error("Settlement operation failed: {0}")]
    OperationFailed(String),

    /// Unknown session or transaction
    #[error("Not found: {0}")]
    NotFound(String),

    /// Too many public requests from this caller
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Persistence layer failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Storage system errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    OpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::WriteFailed(e.to_string())
    }
}

impl From<rocksdb::Error> for CashierError {
    fn from(e: rocksdb::Error) -> Self {
        CashierError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::CorruptedData(e.to_string())
    }
}

/// Convenience type alias for Results
pub type CashierResult<T> = Result<T, CashierError>;
