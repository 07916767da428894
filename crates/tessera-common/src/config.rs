//! Configuration structures for TesseraDB.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, TesseraError};

/// Configuration for the buffer pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

/// Configuration for the disk manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskManagerConfig {
    /// Path of the index file.
    pub path: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./tessera.idx"),
            fsync_enabled: true,
        }
    }
}

/// Construction options for a B+tree index.
///
/// `leaf_max_size` / `internal_max_size` bound the number of slots per
/// page variant. `None` derives the largest count that fits a page for
/// the index's key/value widths; explicit values must be at least 3.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BPlusTreeConfig {
    /// Maximum entries per leaf page (None = derive from page size).
    pub leaf_max_size: Option<usize>,
    /// Maximum children per internal page (None = derive from page size).
    pub internal_max_size: Option<usize>,
}

impl BPlusTreeConfig {
    /// Creates a config with explicit per-variant capacities.
    pub fn with_max_sizes(leaf_max_size: usize, internal_max_size: usize) -> Self {
        Self {
            leaf_max_size: Some(leaf_max_size),
            internal_max_size: Some(internal_max_size),
        }
    }

    /// Validates the configured capacities.
    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.leaf_max_size {
            if n < 3 {
                return Err(TesseraError::InvalidParameter {
                    name: "leaf_max_size",
                    value: n.to_string(),
                });
            }
        }
        if let Some(n) = self.internal_max_size {
            if n < 3 {
                return Err(TesseraError::InvalidParameter {
                    name: "internal_max_size",
                    value: n.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_config_default() {
        let config = BufferPoolConfig::default();
        assert_eq!(config.num_frames, 1024);
    }

    #[test]
    fn test_disk_manager_config_default() {
        let config = DiskManagerConfig::default();
        assert!(config.fsync_enabled);
        assert_eq!(config.path, PathBuf::from("./tessera.idx"));
    }

    #[test]
    fn test_btree_config_default_is_derived() {
        let config = BPlusTreeConfig::default();
        assert!(config.leaf_max_size.is_none());
        assert!(config.internal_max_size.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_btree_config_explicit_sizes() {
        let config = BPlusTreeConfig::with_max_sizes(3, 4);
        assert_eq!(config.leaf_max_size, Some(3));
        assert_eq!(config.internal_max_size, Some(4));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_btree_config_rejects_tiny_sizes() {
        assert!(BPlusTreeConfig::with_max_sizes(2, 4).validate().is_err());
        assert!(BPlusTreeConfig::with_max_sizes(3, 2).validate().is_err());
        assert!(BPlusTreeConfig::with_max_sizes(3, 3).validate().is_ok());
    }

    #[test]
    fn test_btree_config_serde_roundtrip() {
        let config = BPlusTreeConfig::with_max_sizes(5, 6);
        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: BPlusTreeConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.leaf_max_size, Some(5));
        assert_eq!(deserialized.internal_max_size, Some(6));
    }
}
