//! Error types for the core crate.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the local document model and the wire codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A server document is absent or lacks a required shape.
    #[error("data format error: {message}")]
    DataFormat {
        /// Description of the malformed input.
        message: String,
    },

    /// A strict accessor asked for a field that is not set.
    #[error("field `{field}` is not set")]
    MissingField {
        /// Name of the field.
        field: String,
    },

    /// A strict accessor asked for a field that cannot be coerced.
    #[error("field `{field}` is not {expected}")]
    FieldAccess {
        /// Name of the field.
        field: String,
        /// Human readable name of the requested type.
        expected: &'static str,
    },

    /// A date string does not match `YYYY-MM-DD HH:MM:SS`.
    #[error("invalid date: {input:?}")]
    InvalidDate {
        /// The rejected input.
        input: String,
    },

    /// Operation not supported by this kind of entity.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation was rejected.
        message: String,
    },

    /// Snapshot encoding or decoding failed.
    #[error("snapshot error: {message}")]
    Snapshot {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a data format error.
    pub fn data_format(message: impl Into<String>) -> Self {
        Self::DataFormat {
            message: message.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates a field access error.
    pub fn field_access(field: impl Into<String>, expected: &'static str) -> Self {
        Self::FieldAccess {
            field: field.into(),
            expected,
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a snapshot error.
    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot {
            message: message.into(),
        }
    }

    /// Returns true for malformed server data.
    pub fn is_data_format(&self) -> bool {
        matches!(self, Self::DataFormat { .. })
    }

    /// Returns true when a strict getter failed.
    pub fn is_field_access(&self) -> bool {
        matches!(self, Self::FieldAccess { .. } | Self::MissingField { .. })
    }
}
