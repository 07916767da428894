//! Error types for TesseraDB.

use thiserror::Error;

use crate::page::PageId;

/// Result type alias using TesseraError.
pub type Result<T> = std::result::Result<T, TesseraError>;

/// Errors that can occur in TesseraDB operations.
#[derive(Debug, Error)]
pub enum TesseraError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer pool errors
    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page {page_id} is pinned and cannot be deleted")]
    PagePinned { page_id: PageId },

    // Index errors
    #[error("Index corrupted at {page_id}: {reason}")]
    IndexCorrupted { page_id: PageId, reason: String },

    #[error("Invalid page type {found} at {page_id} (expected {expected})")]
    UnexpectedPageType {
        page_id: PageId,
        expected: &'static str,
        found: u32,
    },

    // Configuration errors
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: &'static str, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TesseraError {
    /// Builds an index-corruption error.
    pub fn corrupted(page_id: PageId, reason: impl Into<String>) -> Self {
        Self::IndexCorrupted {
            page_id,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: TesseraError = io_err.into();
        assert!(matches!(err, TesseraError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_not_found_display() {
        let err = TesseraError::PageNotFound(PageId::new(42));
        assert_eq!(err.to_string(), "Page not found: page:42");
    }

    #[test]
    fn test_buffer_pool_full_display() {
        let err = TesseraError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_corrupted_display() {
        let err = TesseraError::corrupted(PageId::new(100), "child pointer out of range");
        assert_eq!(
            err.to_string(),
            "Index corrupted at page:100: child pointer out of range"
        );
    }

    #[test]
    fn test_unexpected_page_type_display() {
        let err = TesseraError::UnexpectedPageType {
            page_id: PageId::new(7),
            expected: "leaf",
            found: 2,
        };
        assert_eq!(
            err.to_string(),
            "Invalid page type 2 at page:7 (expected leaf)"
        );
    }

    #[test]
    fn test_invalid_parameter_display() {
        let err = TesseraError::InvalidParameter {
            name: "leaf_max_size",
            value: "2".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid parameter: leaf_max_size = 2");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(TesseraError::Internal("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TesseraError>();
    }
}
