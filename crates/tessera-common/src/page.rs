//! Page identifiers for TesseraDB storage.

use serde::{Deserialize, Serialize};

/// Default page size in bytes (16 KB).
pub const PAGE_SIZE: usize = 16 * 1024;

/// Unique identifier for a page within the index file.
///
/// Page numbers are dense and 0-indexed; `PageId::INVALID` is the
/// sentinel used for "no page" (an empty tree's root, the tail of the
/// leaf chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Invalid page ID.
    pub const INVALID: PageId = PageId(u32::MAX);

    /// Creates a new PageId.
    pub fn new(page_num: u32) -> Self {
        Self(page_num)
    }

    /// Returns true if this is a valid page ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Returns the raw page number.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns the byte offset of this page within the index file.
    pub fn file_offset(&self) -> u64 {
        self.0 as u64 * PAGE_SIZE as u64
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "page:{}", self.0)
        } else {
            write!(f, "page:invalid")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_constant() {
        assert_eq!(PAGE_SIZE, 16 * 1024);
        assert_eq!(PAGE_SIZE, 16384);
    }

    #[test]
    fn test_page_id_validity() {
        let valid = PageId::new(0);
        let invalid = PageId::INVALID;

        assert!(valid.is_valid());
        assert!(!invalid.is_valid());
    }

    #[test]
    fn test_page_id_file_offset() {
        assert_eq!(PageId::new(0).file_offset(), 0);
        assert_eq!(PageId::new(1).file_offset(), PAGE_SIZE as u64);
        assert_eq!(PageId::new(10).file_offset(), 10 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId::new(42).to_string(), "page:42");
        assert_eq!(PageId::INVALID.to_string(), "page:invalid");
    }

    #[test]
    fn test_page_id_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(PageId::new(1));
        set.insert(PageId::new(2));
        set.insert(PageId::new(1));

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_page_id_serde_roundtrip() {
        let original = PageId::new(500);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: PageId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
