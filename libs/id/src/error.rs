//! Error types for node name parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or generating node names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The name string is empty.
    #[error("node name cannot be empty")]
    Empty,

    /// The name is missing the underscore separating kind and instance.
    #[error("node name missing underscore separator")]
    MissingSeparator,

    /// The kind tag is empty or contains characters outside `[A-Za-z0-9.-_]`.
    #[error("invalid node kind: '{kind}'")]
    InvalidKind { kind: String },

    /// The instance portion is not a positive integer.
    #[error("invalid instance id: '{0}'")]
    InvalidInstance(String),
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    /// Returns true if this error is about the kind tag.
    pub fn is_kind_error(&self) -> bool {
        matches!(self, IdError::InvalidKind { .. })
    }
}
