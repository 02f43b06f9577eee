//! Error types for lhdb
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using LhdbError
pub type Result<T> = std::result::Result<T, LhdbError>;

/// Unified error type for lhdb operations
#[derive(Debug, Error)]
pub enum LhdbError {
    // -------------------------------------------------------------------------
    // Handle Errors
    // -------------------------------------------------------------------------
    /// Operation not permitted on this handle (read-only or closed)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Advisory lock could not be acquired on open
    #[error("Lock error: {0}")]
    Lock(String),

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Format Errors
    // -------------------------------------------------------------------------
    /// Bad magic, unsupported version, dangling pointer or malformed encoding
    #[error("Format error: {0}")]
    Format(String),

    // -------------------------------------------------------------------------
    // Allocator Errors
    // -------------------------------------------------------------------------
    #[error("Allocation exhausted: cannot allocate {size} bytes")]
    AllocationExhausted { size: u64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl LhdbError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        LhdbError::Format(msg.into())
    }
}
