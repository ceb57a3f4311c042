use thiserror::Error;

/// Errors raised by the ledger and its storage backends.
///
/// Business outcomes (a conflicting claim, insufficient funds, a reused
/// withdrawal reference) are not errors; see [`crate::domain::outcome`].
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
    #[cfg(feature = "storage-postgres")]
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
