//! Hardware programming error types.

use thiserror::Error;

/// Error returned by a single hardware call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwError {
    /// The operation is not available on this switch.
    #[error("Operation not supported: {feature}")]
    NotSupported { feature: String },

    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    #[error("Item not found: {item}")]
    NotFound { item: String },

    #[error("Item already exists: {item}")]
    AlreadyExists { item: String },

    /// A hardware table has no free entries left.
    #[error("Table full: {table}")]
    TableFull { table: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl HwError {
    pub fn not_supported(feature: impl Into<String>) -> Self {
        HwError::NotSupported {
            feature: feature.into(),
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        HwError::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn not_found(item: impl Into<String>) -> Self {
        HwError::NotFound { item: item.into() }
    }

    pub fn already_exists(item: impl Into<String>) -> Self {
        HwError::AlreadyExists { item: item.into() }
    }

    pub fn table_full(table: impl Into<String>) -> Self {
        HwError::TableFull {
            table: table.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        HwError::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the error means the hardware is out of room.
    pub fn is_table_full(&self) -> bool {
        matches!(self, HwError::TableFull { .. })
    }
}

/// Result type for hardware operations.
pub type HwResult<T> = Result<T, HwError>;

/// Failure of a bulk call.
///
/// `processed` entries at the front of the input were consumed before the
/// call failed; they are in hardware and must not be resubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("bulk operation failed after {processed} entries: {source}")]
pub struct BulkError {
    pub processed: usize,
    #[source]
    pub source: HwError,
}

impl BulkError {
    pub fn new(processed: usize, source: HwError) -> Self {
        BulkError { processed, source }
    }
}
