//! Error types for ldbm
//!
//! Provides a unified error type for all backend operations.
//!
//! Not every anomaly is an error here:
//! - an unindexed attribute is reported as `IndexLookup::NotIndexed`
//! - a missing continuation block is logged and read as empty
//! - a full handle pool blocks the caller instead of failing

use thiserror::Error;

/// Result type alias using LdbmError
pub type Result<T> = std::result::Result<T, LdbmError>;

/// Unified error type for ldbm operations
#[derive(Debug, Error)]
pub enum LdbmError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Container corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Directory Errors
    // -------------------------------------------------------------------------
    #[error("Already exists: {0}")]
    Duplicate(String),

    #[error("No such object: {0}")]
    NoSuchObject(String),

    #[error("Parent does not exist: {0}")]
    NoSuchParent(String),

    #[error("Invalid DN: {0}")]
    InvalidDn(String),

    #[error("Operation not allowed on non-leaf: {0}")]
    NotAllowedOnNonLeaf(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // -------------------------------------------------------------------------
    // Search Errors
    // -------------------------------------------------------------------------
    #[error("Operation abandoned")]
    Abandoned,

    #[error("Filter syntax error: {0}")]
    FilterSyntax(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LdbmError {
    /// True for failures of the on-disk layer (open/read/write/sync)
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            LdbmError::Io(_) | LdbmError::StorageUnavailable(_) | LdbmError::Corruption(_)
        )
    }
}

impl From<bincode::Error> for LdbmError {
    fn from(e: bincode::Error) -> Self {
        LdbmError::Serialization(e.to_string())
    }
}
