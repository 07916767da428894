//! Forward iterator over the leaf chain.
//!
//! The iterator holds a shared latch on exactly one leaf at a time.
//! Hopping to the next leaf releases the current guard *before*
//! acquiring the successor, so a scan never waits while holding a
//! latch. The price is that a concurrent restructure can invalidate the
//! hop: the successor may have been merged away or recycled. Both cases
//! are detected (a non-leaf page, or a key that fails to advance) and
//! end the scan, so every scan yields a strictly increasing,
//! duplicate-free key sequence.

use tracing::warn;

use tessera_buffer::ReadPageGuard;
use tessera_common::page::PageId;

use crate::key::{KeyComparator, SlotData};
use crate::page::{page_kind, LeafPage, PageKind};
use crate::tree::BPlusTree;

/// Cursor over the leaf chain, yielding `(key, value)` pairs in key
/// order.
pub struct IndexIterator<'a, K, V, C> {
    tree: &'a BPlusTree<K, V, C>,
    guard: Option<ReadPageGuard<'a>>,
    slot: usize,
    last_key: Option<K>,
}

enum Step<K, V> {
    Yield(K, V),
    Hop(PageId),
    Stop,
}

impl<'a, K, V, C> IndexIterator<'a, K, V, C>
where
    K: SlotData,
    V: SlotData,
    C: KeyComparator<K>,
{
    pub(crate) fn new(tree: &'a BPlusTree<K, V, C>, guard: ReadPageGuard<'a>, slot: usize) -> Self {
        Self {
            tree,
            guard: Some(guard),
            slot,
            last_key: None,
        }
    }

    /// The exhausted iterator.
    pub(crate) fn end(tree: &'a BPlusTree<K, V, C>) -> Self {
        Self {
            tree,
            guard: None,
            slot: 0,
            last_key: None,
        }
    }

    /// True once the scan has ended.
    pub fn is_end(&self) -> bool {
        self.guard.is_none()
    }

    fn step(&self) -> Step<K, V> {
        let Some(guard) = self.guard.as_ref() else {
            return Step::Stop;
        };

        if page_kind(guard.data()) != Some(PageKind::Leaf) {
            // The page was restructured between hops.
            warn!(page = %guard.page_id(), "scan landed on a non-leaf page; ending");
            return Step::Stop;
        }

        let leaf = LeafPage::<K, V>::new(guard.data());
        if self.slot >= leaf.size() {
            return Step::Hop(leaf.next_leaf());
        }

        let key = leaf.key_at(self.slot);
        if let Some(last) = &self.last_key {
            // Chain keys are strictly increasing; a regression means the
            // chain changed underneath the scan.
            if self.tree.comparator.compare(&key, last) != std::cmp::Ordering::Greater {
                warn!(page = %guard.page_id(), "scan key did not advance; ending");
                return Step::Stop;
            }
        }
        Step::Yield(key, leaf.value_at(self.slot))
    }
}

impl<K, V, C> Iterator for IndexIterator<'_, K, V, C>
where
    K: SlotData,
    V: SlotData,
    C: KeyComparator<K>,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            match self.step() {
                Step::Yield(key, value) => {
                    self.slot += 1;
                    self.last_key = Some(key);
                    return Some((key, value));
                }
                Step::Hop(next) => {
                    // Release-then-acquire: never block while latched.
                    self.guard = None;
                    self.slot = 0;
                    if !next.is_valid() {
                        return None;
                    }
                    match self.tree.bpm.fetch_read(next) {
                        Ok(guard) => self.guard = Some(guard),
                        Err(e) => {
                            warn!(page = %next, error = %e, "scan hop failed; ending");
                            return None;
                        }
                    }
                }
                Step::Stop => {
                    self.guard = None;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::key::DefaultComparator;
    use crate::tree::BPlusTree;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tessera_buffer::{BufferPool, DiskManager};
    use tessera_common::config::{BPlusTreeConfig, BufferPoolConfig, DiskManagerConfig};

    fn create_test_tree() -> (tempfile::TempDir, BPlusTree<u64, u64>) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                path: dir.path().join("iter.idx"),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let bpm = Arc::new(BufferPool::new(BufferPoolConfig { num_frames: 128 }, disk));
        let tree = BPlusTree::create(
            bpm,
            DefaultComparator,
            BPlusTreeConfig::with_max_sizes(3, 4),
        )
        .unwrap();
        (dir, tree)
    }

    #[test]
    fn test_iter_empty_tree() {
        let (_dir, tree) = create_test_tree();
        let mut iter = tree.iter().unwrap();
        assert!(iter.is_end());
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_iter_yields_sorted_pairs() {
        let (_dir, tree) = create_test_tree();
        for k in [9u64, 1, 7, 3, 5, 8, 2, 6, 4] {
            tree.insert(k, k * 10).unwrap();
        }

        let pairs: Vec<(u64, u64)> = tree.iter().unwrap().collect();
        let expected: Vec<(u64, u64)> = (1..=9).map(|k| (k, k * 10)).collect();
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_iter_from_existing_key() {
        let (_dir, tree) = create_test_tree();
        for k in 1..=9u64 {
            tree.insert(k, k).unwrap();
        }

        let keys: Vec<u64> = tree.iter_from(&5).unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_iter_from_missing_key_starts_at_successor() {
        let (_dir, tree) = create_test_tree();
        for k in [2u64, 4, 6, 8] {
            tree.insert(k, k).unwrap();
        }

        let keys: Vec<u64> = tree.iter_from(&5).unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![6, 8]);
    }

    #[test]
    fn test_iter_from_past_end_is_empty() {
        let (_dir, tree) = create_test_tree();
        for k in 1..=4u64 {
            tree.insert(k, k).unwrap();
        }

        let keys: Vec<u64> = tree.iter_from(&99).unwrap().map(|(k, _)| k).collect();
        assert!(keys.is_empty());
    }

    #[test]
    fn test_iter_crosses_leaf_boundaries() {
        let (_dir, tree) = create_test_tree();
        // Enough keys for several leaves at leaf_max 3.
        for k in 1..=50u64 {
            tree.insert(k, k).unwrap();
        }

        let keys: Vec<u64> = tree.iter().unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, (1..=50).collect::<Vec<u64>>());
    }
}
