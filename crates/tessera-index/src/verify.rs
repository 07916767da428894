//! Structural integrity checking.
//!
//! Walks a quiescent tree and verifies, for every page:
//!
//! - non-root occupancy within `[min_size, max_size]`, root occupancy
//!   at least 1 (leaf) or 2 (internal);
//! - keys strictly increasing under the tree's comparator;
//! - each routing key equal to the minimum key of its child's subtree,
//!   and child key ranges properly separated;
//! - all leaves at the same depth;
//! - the leaf chain visiting every key exactly once, in strictly
//!   increasing order, ending at the invalid-page sentinel.
//!
//! Property and boundary tests call this after every batch of
//! operations; it is also a useful debugging probe.

use std::cmp::Ordering;

use tessera_common::page::PageId;
use tessera_common::{Result, TesseraError};

use crate::key::{KeyComparator, SlotData};
use crate::page::{page_kind, InternalPage, LeafPage, PageKind};
use crate::tree::BPlusTree;

struct SubtreeSummary<K> {
    depth: usize,
    min_key: K,
    max_key: K,
    leftmost_leaf: PageId,
    key_count: usize,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: SlotData,
    V: SlotData,
    C: KeyComparator<K>,
{
    /// Verifies every structural invariant of a quiescent tree.
    pub fn check_integrity(&self) -> Result<()> {
        let root = self.root_page_id()?;
        if !root.is_valid() {
            return Ok(());
        }

        let summary = self.check_subtree(root, true)?;
        self.check_leaf_chain(summary.leftmost_leaf, summary.key_count)
    }

    fn check_subtree(&self, page_id: PageId, is_root: bool) -> Result<SubtreeSummary<K>> {
        enum Collected<K> {
            Leaf(SubtreeSummary<K>),
            Internal {
                keys: Vec<Option<K>>,
                children: Vec<PageId>,
            },
        }

        let collected = {
            let guard = self.bpm.fetch_read(page_id)?;
            match page_kind(guard.data()) {
                Some(PageKind::Leaf) => {
                    let leaf = LeafPage::<K, V>::new(guard.data());
                    let size = leaf.size();

                    if size > leaf.max_size() {
                        return Err(TesseraError::corrupted(page_id, "leaf over capacity"));
                    }
                    let min_required = if is_root { 1 } else { leaf.min_size() };
                    if size < min_required {
                        return Err(TesseraError::corrupted(page_id, "leaf under minimum size"));
                    }
                    for i in 1..size {
                        if self
                            .comparator
                            .compare(&leaf.key_at(i - 1), &leaf.key_at(i))
                            != Ordering::Less
                        {
                            return Err(TesseraError::corrupted(
                                page_id,
                                "leaf keys not strictly increasing",
                            ));
                        }
                    }

                    Collected::Leaf(SubtreeSummary {
                        depth: 1,
                        min_key: leaf.key_at(0),
                        max_key: leaf.key_at(size - 1),
                        leftmost_leaf: page_id,
                        key_count: size,
                    })
                }
                Some(PageKind::Internal) => {
                    let internal = InternalPage::<K>::new(guard.data());
                    let size = internal.size();

                    if size > internal.max_size() {
                        return Err(TesseraError::corrupted(page_id, "internal over capacity"));
                    }
                    let min_required = if is_root { 2 } else { internal.min_size() };
                    if size < min_required {
                        return Err(TesseraError::corrupted(
                            page_id,
                            "internal under minimum size",
                        ));
                    }
                    for i in 2..size {
                        if self
                            .comparator
                            .compare(&internal.key_at(i - 1), &internal.key_at(i))
                            != Ordering::Less
                        {
                            return Err(TesseraError::corrupted(
                                page_id,
                                "routing keys not strictly increasing",
                            ));
                        }
                    }

                    let mut keys = Vec::with_capacity(size);
                    let mut children = Vec::with_capacity(size);
                    for i in 0..size {
                        keys.push((i >= 1).then(|| internal.key_at(i)));
                        let child = internal.child_at(i);
                        if !child.is_valid() {
                            return Err(TesseraError::corrupted(
                                page_id,
                                "invalid child pointer",
                            ));
                        }
                        children.push(child);
                    }
                    Collected::Internal { keys, children }
                }
                _ => {
                    return Err(TesseraError::corrupted(
                        page_id,
                        "unknown page kind in tree walk",
                    ))
                }
            }
        };

        let (keys, children) = match collected {
            Collected::Leaf(summary) => return Ok(summary),
            Collected::Internal { keys, children } => (keys, children),
        };

        let mut depth = 0;
        let mut min_key = None;
        let mut max_key: Option<K> = None;
        let mut leftmost_leaf = PageId::INVALID;
        let mut key_count = 0;

        for (i, child) in children.iter().enumerate() {
            let sub = self.check_subtree(*child, false)?;

            if i == 0 {
                depth = sub.depth;
                min_key = Some(sub.min_key);
                leftmost_leaf = sub.leftmost_leaf;
            } else {
                if sub.depth != depth {
                    return Err(TesseraError::corrupted(
                        page_id,
                        "leaves at unequal depth",
                    ));
                }
                let routing = keys[i].as_ref().ok_or_else(|| {
                    TesseraError::Internal("missing routing key in walk".to_string())
                })?;
                if self.comparator.compare(routing, &sub.min_key) != Ordering::Equal {
                    return Err(TesseraError::corrupted(
                        page_id,
                        "routing key differs from subtree minimum",
                    ));
                }
                if let Some(prev_max) = &max_key {
                    if self.comparator.compare(prev_max, &sub.min_key) != Ordering::Less {
                        return Err(TesseraError::corrupted(
                            page_id,
                            "child key ranges overlap",
                        ));
                    }
                }
            }

            max_key = Some(sub.max_key);
            key_count += sub.key_count;
        }

        let (min_key, max_key) = match (min_key, max_key) {
            (Some(min), Some(max)) => (min, max),
            _ => {
                return Err(TesseraError::corrupted(page_id, "internal page without children"))
            }
        };

        Ok(SubtreeSummary {
            depth: depth + 1,
            min_key,
            max_key,
            leftmost_leaf,
            key_count,
        })
    }

    fn check_leaf_chain(&self, first: PageId, expected_count: usize) -> Result<()> {
        let mut current = first;
        let mut previous: Option<K> = None;
        let mut seen = 0;

        while current.is_valid() {
            let guard = self.bpm.fetch_read(current)?;
            let leaf = LeafPage::<K, V>::try_from_page(current, guard.data())?;

            for i in 0..leaf.size() {
                let key = leaf.key_at(i);
                if let Some(prev) = &previous {
                    if self.comparator.compare(prev, &key) != Ordering::Less {
                        return Err(TesseraError::corrupted(
                            current,
                            "leaf chain keys not strictly increasing",
                        ));
                    }
                }
                previous = Some(key);
                seen += 1;
            }

            current = leaf.next_leaf();
        }

        if seen != expected_count {
            return Err(TesseraError::corrupted(
                first,
                format!(
                    "leaf chain visited {} keys but the tree holds {}",
                    seen, expected_count
                ),
            ));
        }
        Ok(())
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
                path: dir.path().join("verify.idx"),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let bpm = Arc::new(BufferPool::new(BufferPoolConfig { num_frames: 256 }, disk));
        let tree = BPlusTree::create(
            bpm,
            DefaultComparator,
            BPlusTreeConfig::with_max_sizes(3, 3),
        )
        .unwrap();
        (dir, tree)
    }

    #[test]
    fn test_integrity_of_empty_tree() {
        let (_dir, tree) = create_test_tree();
        tree.check_integrity().unwrap();
    }

    #[test]
    fn test_integrity_through_growth_and_shrink() {
        let (_dir, tree) = create_test_tree();

        for k in 1..=60u64 {
            tree.insert(k, k).unwrap();
            tree.check_integrity().unwrap();
        }
        for k in 1..=60u64 {
            tree.remove(k).unwrap();
            tree.check_integrity().unwrap();
        }
        assert!(tree.is_empty().unwrap());
    }

    #[test]
    fn test_integrity_with_random_order() {
        let (_dir, tree) = create_test_tree();

        // Deterministic shuffle via multiplicative stepping.
        for i in 0..101u64 {
            tree.insert((i * 37) % 101, i).unwrap();
        }
        tree.check_integrity().unwrap();

        for i in 0..101u64 {
            tree.remove((i * 59) % 101).unwrap();
            tree.check_integrity().unwrap();
        }
        assert!(tree.is_empty().unwrap());
    }
}
