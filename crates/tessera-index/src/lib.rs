//! Concurrent on-disk B+tree index for TesseraDB.
//!
//! The index stores unique, fixed-width keys mapped to fixed-width
//! values in a tree of buffer-managed pages. Internal pages route
//! searches through separator keys; leaf pages hold the data and form a
//! forward-linked chain for ordered scans.
//!
//! ```text
//!                  [header page] -> root page id
//!                        |
//!                  [internal page]
//!                  /      |      \
//!          [leaf] -> [leaf] -> [leaf] -> (end)
//! ```
//!
//! Concurrent access uses latch coupling: readers hold at most a
//! parent/child pair of shared latches; writers descend under exclusive
//! latches and release the ancestor chain as soon as a child is safe
//! (cannot split or merge into its parent). Structural changes therefore
//! hold exactly the sub-tree they might touch, and the header page's
//! latch serializes root swaps.
//!
//! Page layout, split/merge policies, and the iterator contract are
//! documented on the individual modules.

mod context;
mod draw;
mod header;
mod iterator;
mod key;
mod page;
mod tree;
mod verify;

pub use iterator::IndexIterator;
pub use key::{DefaultComparator, KeyComparator, RecordId, SlotData};
pub use page::{PageKind, LEAF_HEADER_LEN, PAGE_HEADER_LEN};
pub use tree::BPlusTree;

pub use tessera_common::{BPlusTreeConfig, PageId, Result, TesseraError};
