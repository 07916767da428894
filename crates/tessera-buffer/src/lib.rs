//! Buffer pool manager for TesseraDB.
//!
//! This crate provides:
//! - Buffer frames holding page data behind per-page reader/writer latches
//! - RAII page guards (basic / read / write) that release the latch and
//!   unpin on scope exit
//! - Clock replacement for eviction with dirty write-back
//! - A disk manager for page-granular file I/O

mod disk;
mod frame;
mod guard;
mod page_table;
mod pool;
mod replacer;

pub use disk::DiskManager;
pub use frame::{BufferFrame, FrameId};
pub use guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
pub use page_table::PageTable;
pub use pool::{BufferPool, BufferPoolStats};
pub use replacer::{ClockReplacer, Replacer};
