//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The table does not exist.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A table with this id already exists.
    #[error("table already exists: {0}")]
    TableExists(String),

    /// The row does not exist.
    #[error("row {row_id} not found in table {table_id}")]
    RowNotFound {
        /// Table id.
        table_id: String,
        /// Row id.
        row_id: String,
    },

    /// A row with this id and version already exists.
    #[error("row {row_id} already exists in table {table_id}")]
    RowExists {
        /// Table id.
        table_id: String,
        /// Row id.
        row_id: String,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store file could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
