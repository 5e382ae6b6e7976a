//! Store error types.

use thiserror::Error;

/// Document store errors.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Document is not a JSON object or has an unusable id
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Snapshot file failed its checksum or could not be parsed
    #[error("Data corruption in {file}: {reason}")]
    DataCorruption { file: String, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Disk full: {0}")]
    DiskFull(String),
}

/// Maps an I/O error to a store error, keeping `context` in the message.
pub fn classify_io_error(error: std::io::Error, context: &str) -> StoreError {
    match error.kind() {
        std::io::ErrorKind::StorageFull | std::io::ErrorKind::OutOfMemory => {
            StoreError::DiskFull(format!("{}: {}", context, error))
        }
        _ => StoreError::IoError(format!("{}: {}", context, error)),
    }
}
