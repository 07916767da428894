//! B+tree operations.
//!
//! All operations start at the header page and descend through internal
//! pages by binary search. Reads couple latches pairwise (parent
//! released as soon as the child is latched). Writes are pessimistic:
//! the descent holds exclusive latches from the header down, releasing
//! the retained chain whenever a newly latched child is *safe* (an
//! insert cannot split it, or a remove cannot shrink it below minimum),
//! so a structural change never escapes the latched sub-tree.
//!
//! Split policy: pages fill to `max_size` and split on overflow. A leaf
//! keeps its first `min_size` entries and moves the rest to a new right
//! sibling, pushing the right sibling's first key up as the separator.
//! An internal page keeps `max_size + 1 - min_size` children; the
//! boundary entry's key is promoted and its child pointer becomes the
//! new right page's slot-0 child.
//!
//! Remove policy: a page falling below `min_size` first tries to borrow
//! one entry from an immediate sibling (left preferred) and otherwise
//! merges into it, demoting the parent separator on internal merges.
//! Underflow propagates upward; an internal root left with one child is
//! collapsed away and an emptied leaf root empties the header.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

use tessera_buffer::{BasicPageGuard, BufferPool, WritePageGuard};
use tessera_common::config::BPlusTreeConfig;
use tessera_common::page::{PageId, PAGE_SIZE};
use tessera_common::{Result, TesseraError};

use crate::context::{Context, PathStep};
use crate::header;
use crate::iterator::IndexIterator;
use crate::key::{DefaultComparator, KeyComparator, SlotData};
use crate::page::{
    internal_capacity, leaf_capacity, min_size_for, page_kind, set_page_kind, InternalPage,
    InternalPageMut, LeafPage, LeafPageMut, PageKind, LEAF_HEADER_LEN, PAGE_HEADER_LEN,
};

/// Pages pre-allocated for a split cascade, pinned until consumed.
#[derive(Default)]
struct PageReserve<'a> {
    pages: Vec<(PageId, BasicPageGuard<'a>)>,
}

impl<'a> PageReserve<'a> {
    fn take(&mut self) -> Result<(PageId, BasicPageGuard<'a>)> {
        self.pages.pop().ok_or_else(|| {
            TesseraError::Internal("split consumed more pages than were reserved".to_string())
        })
    }

    fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// A concurrent B+tree index over buffer-managed pages.
///
/// Keys are unique under the injected comparator; values are opaque
/// fixed-width payloads. All shared mutable state lives in the buffer
/// pool's pages; the tree object itself is immutable and freely
/// shareable across threads.
pub struct BPlusTree<K, V, C = DefaultComparator> {
    pub(crate) bpm: Arc<BufferPool>,
    pub(crate) comparator: C,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    header_page_id: PageId,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: SlotData,
    V: SlotData,
    C: KeyComparator<K>,
{
    /// Attaches to an existing index without touching its header page.
    pub fn open(
        header_page_id: PageId,
        bpm: Arc<BufferPool>,
        comparator: C,
        config: BPlusTreeConfig,
    ) -> Result<Self> {
        config.validate()?;

        let leaf_max_size = config.leaf_max_size.unwrap_or_else(leaf_capacity::<K, V>);
        let internal_max_size = config
            .internal_max_size
            .unwrap_or_else(internal_capacity::<K>);

        if LEAF_HEADER_LEN + leaf_max_size * (K::WIDTH + V::WIDTH) > PAGE_SIZE {
            return Err(TesseraError::InvalidParameter {
                name: "leaf_max_size",
                value: leaf_max_size.to_string(),
            });
        }
        if PAGE_HEADER_LEN + internal_max_size * (K::WIDTH + PageId::WIDTH) > PAGE_SIZE {
            return Err(TesseraError::InvalidParameter {
                name: "internal_max_size",
                value: internal_max_size.to_string(),
            });
        }

        Ok(Self {
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            header_page_id,
            _marker: PhantomData,
        })
    }

    /// Initializes a fresh index over a caller-allocated header page.
    pub fn new(
        header_page_id: PageId,
        bpm: Arc<BufferPool>,
        comparator: C,
        config: BPlusTreeConfig,
    ) -> Result<Self> {
        let tree = Self::open(header_page_id, bpm, comparator, config)?;
        {
            let mut header = tree.bpm.fetch_write(header_page_id)?;
            header::set_root_page_id(header.data_mut(), PageId::INVALID);
        }
        Ok(tree)
    }

    /// Allocates a header page and initializes a fresh index on it.
    pub fn create(bpm: Arc<BufferPool>, comparator: C, config: BPlusTreeConfig) -> Result<Self> {
        let header_page_id = {
            let (page_id, guard) = bpm.new_page()?;
            let mut header = guard.upgrade_write();
            header::set_root_page_id(header.data_mut(), PageId::INVALID);
            page_id
        };
        Self::open(header_page_id, bpm, comparator, config)
    }

    /// Returns the header page ID this index was constructed with.
    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Returns the current root page ID (INVALID when empty).
    pub fn root_page_id(&self) -> Result<PageId> {
        let header = self.bpm.fetch_read(self.header_page_id)?;
        Ok(header::root_page_id(header.data()))
    }

    /// Returns true if the index holds no keys.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(!self.root_page_id()?.is_valid())
    }

    /// Point lookup. Appends the key's value to `result` and returns
    /// true when present.
    pub fn get_value(&self, key: &K, result: &mut Vec<V>) -> Result<bool> {
        let header = self.bpm.fetch_read(self.header_page_id)?;
        let root = header::root_page_id(header.data());
        if !root.is_valid() {
            return Ok(false);
        }

        // The root guard pins the current root view; the header can be
        // released as soon as that latch is held.
        let mut guard = self.bpm.fetch_read(root)?;
        drop(header);

        loop {
            match page_kind(guard.data()) {
                Some(PageKind::Leaf) => {
                    let leaf = LeafPage::<K, V>::new(guard.data());
                    return match leaf.lookup(&self.comparator, key) {
                        Ok(i) => {
                            result.push(leaf.value_at(i));
                            Ok(true)
                        }
                        Err(_) => Ok(false),
                    };
                }
                Some(PageKind::Internal) => {
                    let child = {
                        let internal = InternalPage::<K>::new(guard.data());
                        internal.child_at(internal.locate_child(&self.comparator, key))
                    };
                    if !child.is_valid() {
                        return Err(TesseraError::corrupted(
                            guard.page_id(),
                            "invalid child pointer during search",
                        ));
                    }
                    let next = self.bpm.fetch_read(child)?;
                    guard = next;
                }
                _ => {
                    return Err(TesseraError::corrupted(
                        guard.page_id(),
                        "unknown page kind during search",
                    ))
                }
            }
        }
    }

    /// Convenience point lookup.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let mut out = Vec::with_capacity(1);
        if self.get_value(key, &mut out)? {
            Ok(out.pop())
        } else {
            Ok(None)
        }
    }

    /// Inserts a key/value pair. Returns false (with no mutation) when
    /// the key already exists.
    pub fn insert(&self, key: K, value: V) -> Result<bool> {
        let header = self.bpm.fetch_write(self.header_page_id)?;
        let root = header::root_page_id(header.data());
        if !root.is_valid() {
            return self.start_new_tree(header, key, value);
        }

        let mut ctx = Context::new(header, root);
        self.descend_for_insert(&mut ctx, &key)?;

        let (duplicate, pos, full) = {
            let step = self.leaf_step(&ctx)?;
            let leaf = LeafPage::<K, V>::new(step.guard.data());
            match leaf.lookup(&self.comparator, &key) {
                Ok(_) => (true, 0, false),
                Err(pos) => (false, pos, leaf.size() == leaf.max_size()),
            }
        };

        if duplicate {
            return Ok(false);
        }

        if !full {
            let step = self.leaf_step_mut(&mut ctx)?;
            let mut leaf = LeafPageMut::<K, V>::new(step.guard.data_mut());
            leaf.insert_slot(pos, &key, &value);
            return Ok(true);
        }

        // Every page the split cascade will touch is already latched;
        // allocate every page it will need before the first mutation,
        // so an allocator failure aborts with the tree untouched.
        let mut reserve = self.reserve_split_pages(&ctx)?;
        let (separator, right_id) = self.split_leaf(&mut ctx, &mut reserve, key, value, pos)?;
        self.insert_into_parent(&mut ctx, &mut reserve, separator, right_id)?;
        debug_assert!(reserve.is_empty());
        Ok(true)
    }

    /// Removes a key. Absent keys are a silent no-op.
    pub fn remove(&self, key: K) -> Result<()> {
        let header = self.bpm.fetch_write(self.header_page_id)?;
        let root = header::root_page_id(header.data());
        if !root.is_valid() {
            return Ok(());
        }

        let mut ctx = Context::new(header, root);
        self.descend_for_remove(&mut ctx, &key)?;

        let leaf_is_root = {
            let step = self.leaf_step(&ctx)?;
            ctx.is_root(step.guard.page_id())
        };

        let (pos, will_underflow) = {
            let step = self.leaf_step(&ctx)?;
            let leaf = LeafPage::<K, V>::new(step.guard.data());
            match leaf.lookup(&self.comparator, &key) {
                Ok(pos) => (pos, !leaf_is_root && leaf.size() == leaf.min_size()),
                Err(_) => return Ok(()),
            }
        };

        // Latch every sibling the rebalance cascade can touch before the
        // first mutation; a latch failure then aborts with the tree
        // untouched.
        let siblings = if will_underflow {
            self.prelatch_rebalance_siblings(&ctx)?
        } else {
            Vec::new()
        };

        let size_after = {
            let step = self.leaf_step_mut(&mut ctx)?;
            let mut leaf = LeafPageMut::<K, V>::new(step.guard.data_mut());
            leaf.erase_slot(pos);
            leaf.size()
        };

        if leaf_is_root {
            if size_after == 0 {
                return self.clear_root(&mut ctx);
            }
            return Ok(());
        }

        // Keep ancestor routing exact: deleting a subtree's minimum key
        // leaves one retained ancestor naming it; rewrite that slot to
        // the leaf's new first key.
        if pos == 0 {
            if let Some((level, slot)) = ctx.pending_key_fix.take() {
                let new_first = {
                    let step = self.leaf_step(&ctx)?;
                    LeafPage::<K, V>::new(step.guard.data()).key_at(0)
                };
                let parent = ctx.path.get_mut(level).ok_or_else(|| {
                    TesseraError::Internal("routing fix level escaped the latch chain".to_string())
                })?;
                let mut view = InternalPageMut::<K>::new(parent.guard.data_mut());
                view.set_key_at(slot, &new_first);
            }
        }

        let min_size = {
            let step = self.leaf_step(&ctx)?;
            LeafPage::<K, V>::new(step.guard.data()).min_size()
        };
        if size_after >= min_size {
            return Ok(());
        }

        self.resolve_underflow(&mut ctx, siblings)
    }

    /// Forward iterator from the smallest key.
    pub fn iter(&self) -> Result<IndexIterator<'_, K, V, C>> {
        let header = self.bpm.fetch_read(self.header_page_id)?;
        let root = header::root_page_id(header.data());
        if !root.is_valid() {
            return Ok(IndexIterator::end(self));
        }

        let mut guard = self.bpm.fetch_read(root)?;
        drop(header);

        loop {
            match page_kind(guard.data()) {
                Some(PageKind::Leaf) => return Ok(IndexIterator::new(self, guard, 0)),
                Some(PageKind::Internal) => {
                    let child = InternalPage::<K>::new(guard.data()).child_at(0);
                    let next = self.bpm.fetch_read(child)?;
                    guard = next;
                }
                _ => {
                    return Err(TesseraError::corrupted(
                        guard.page_id(),
                        "unknown page kind during scan start",
                    ))
                }
            }
        }
    }

    /// Forward iterator from the first key `>= key`.
    pub fn iter_from(&self, key: &K) -> Result<IndexIterator<'_, K, V, C>> {
        let header = self.bpm.fetch_read(self.header_page_id)?;
        let root = header::root_page_id(header.data());
        if !root.is_valid() {
            return Ok(IndexIterator::end(self));
        }

        let mut guard = self.bpm.fetch_read(root)?;
        drop(header);

        loop {
            match page_kind(guard.data()) {
                Some(PageKind::Leaf) => {
                    let slot = {
                        let leaf = LeafPage::<K, V>::new(guard.data());
                        match leaf.lookup(&self.comparator, key) {
                            Ok(i) => i,
                            Err(i) => i,
                        }
                    };
                    return Ok(IndexIterator::new(self, guard, slot));
                }
                Some(PageKind::Internal) => {
                    let child = {
                        let internal = InternalPage::<K>::new(guard.data());
                        internal.child_at(internal.locate_child(&self.comparator, key))
                    };
                    let next = self.bpm.fetch_read(child)?;
                    guard = next;
                }
                _ => {
                    return Err(TesseraError::corrupted(
                        guard.page_id(),
                        "unknown page kind during scan start",
                    ))
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Write descent
    // -----------------------------------------------------------------

    fn descend_for_insert<'a>(&'a self, ctx: &mut Context<'a>, key: &K) -> Result<()> {
        let mut current = ctx.root_page_id;
        loop {
            let guard = self.bpm.fetch_write(current)?;
            match page_kind(guard.data()) {
                Some(PageKind::Leaf) => {
                    let safe = {
                        let leaf = LeafPage::<K, V>::new(guard.data());
                        leaf.size() + 1 < leaf.max_size()
                    };
                    if safe {
                        ctx.release_ancestors();
                    }
                    ctx.path.push(PathStep {
                        guard,
                        child_idx: 0,
                    });
                    return Ok(());
                }
                Some(PageKind::Internal) => {
                    let (safe, idx, child) = {
                        let internal = InternalPage::<K>::new(guard.data());
                        let idx = internal.locate_child(&self.comparator, key);
                        (
                            internal.size() < internal.max_size(),
                            idx,
                            internal.child_at(idx),
                        )
                    };
                    if !child.is_valid() {
                        return Err(TesseraError::corrupted(
                            guard.page_id(),
                            "invalid child pointer during insert descent",
                        ));
                    }
                    if safe {
                        ctx.release_ancestors();
                    }
                    ctx.path.push(PathStep {
                        guard,
                        child_idx: idx,
                    });
                    current = child;
                }
                _ => {
                    return Err(TesseraError::corrupted(
                        guard.page_id(),
                        "unknown page kind during insert descent",
                    ))
                }
            }
        }
    }

    fn descend_for_remove<'a>(&'a self, ctx: &mut Context<'a>, key: &K) -> Result<()> {
        let mut current = ctx.root_page_id;
        loop {
            let guard = self.bpm.fetch_write(current)?;
            let is_root = ctx.is_root(current);
            match page_kind(guard.data()) {
                Some(PageKind::Leaf) => {
                    let safe = {
                        let leaf = LeafPage::<K, V>::new(guard.data());
                        if is_root {
                            leaf.size() > 1
                        } else {
                            leaf.size() > leaf.min_size()
                        }
                    };
                    if safe && ctx.can_release() {
                        ctx.release_ancestors();
                    }
                    ctx.path.push(PathStep {
                        guard,
                        child_idx: 0,
                    });
                    return Ok(());
                }
                Some(PageKind::Internal) => {
                    let (safe, idx, child, routes_key) = {
                        let internal = InternalPage::<K>::new(guard.data());
                        let safe = if is_root {
                            internal.size() > 2
                        } else {
                            internal.size() > internal.min_size()
                        };
                        let idx = internal.locate_child(&self.comparator, key);
                        let routes_key = idx >= 1
                            && self.comparator.compare(&internal.key_at(idx), key)
                                == Ordering::Equal;
                        (safe, idx, internal.child_at(idx), routes_key)
                    };
                    if !child.is_valid() {
                        return Err(TesseraError::corrupted(
                            guard.page_id(),
                            "invalid child pointer during remove descent",
                        ));
                    }
                    if safe && ctx.can_release() {
                        ctx.release_ancestors();
                    }
                    ctx.path.push(PathStep {
                        guard,
                        child_idx: idx,
                    });
                    if routes_key {
                        ctx.pending_key_fix = Some((ctx.path.len() - 1, idx));
                    }
                    current = child;
                }
                _ => {
                    return Err(TesseraError::corrupted(
                        guard.page_id(),
                        "unknown page kind during remove descent",
                    ))
                }
            }
        }
    }

    fn leaf_step<'c, 'a>(&self, ctx: &'c Context<'a>) -> Result<&'c PathStep<'a>> {
        ctx.path
            .last()
            .ok_or_else(|| TesseraError::Internal("write descent produced no leaf".to_string()))
    }

    fn leaf_step_mut<'c, 'a>(&self, ctx: &'c mut Context<'a>) -> Result<&'c mut PathStep<'a>> {
        ctx.path
            .last_mut()
            .ok_or_else(|| TesseraError::Internal("write descent produced no leaf".to_string()))
    }

    fn take_header<'a>(&self, ctx: &mut Context<'a>) -> Result<WritePageGuard<'a>> {
        ctx.header.take().ok_or_else(|| {
            TesseraError::Internal("header latch released before a root change".to_string())
        })
    }

    // -----------------------------------------------------------------
    // Insert internals
    // -----------------------------------------------------------------

    fn start_new_tree(&self, mut header: WritePageGuard<'_>, key: K, value: V) -> Result<bool> {
        let (leaf_id, guard) = self.bpm.new_page()?;
        {
            let mut guard = guard.upgrade_write();
            let mut leaf = LeafPageMut::<K, V>::init(guard.data_mut(), self.leaf_max_size);
            leaf.insert_slot(0, &key, &value);
        }
        header::set_root_page_id(header.data_mut(), leaf_id);
        debug!(root = %leaf_id, "started new tree");
        Ok(true)
    }

    /// Allocates every page a pending split cascade can consume: one
    /// right sibling per full page on the retained chain, plus a new
    /// root when the header is still held (the chain being retained that
    /// far means the root itself will split).
    fn reserve_split_pages<'a>(&'a self, ctx: &Context<'a>) -> Result<PageReserve<'a>> {
        let mut needed = 1;
        if !ctx.path.is_empty() {
            for step in &ctx.path[..ctx.path.len() - 1] {
                let internal = InternalPage::<K>::new(step.guard.data());
                if internal.size() == internal.max_size() {
                    needed += 1;
                }
            }
        }
        if ctx.header.is_some() {
            needed += 1;
        }

        let mut reserve = PageReserve::default();
        for _ in 0..needed {
            match self.bpm.new_page() {
                Ok(page) => reserve.pages.push(page),
                Err(e) => {
                    // Return the partial allocation before aborting.
                    for (page_id, guard) in reserve.pages.drain(..) {
                        drop(guard);
                        let _ = self.bpm.delete_page(page_id);
                    }
                    return Err(e);
                }
            }
        }
        Ok(reserve)
    }

    /// Splits the full leaf at the top of the path, inserting the new
    /// entry on the correct side. Returns the separator and the new
    /// right sibling's ID.
    fn split_leaf(
        &self,
        ctx: &mut Context<'_>,
        reserve: &mut PageReserve<'_>,
        key: K,
        value: V,
        pos: usize,
    ) -> Result<(K, PageId)> {
        let step = ctx.path.pop().ok_or_else(|| {
            TesseraError::Internal("write descent produced no leaf".to_string())
        })?;
        let mut left_guard = step.guard;

        let (right_id, right_basic) = reserve.take()?;
        let mut right_guard = right_basic.upgrade_write();

        let separator;
        {
            let mut left = LeafPageMut::<K, V>::new(left_guard.data_mut());
            let max = left.max_size();
            let min = min_size_for(max);
            let mut right = LeafPageMut::<K, V>::init(right_guard.data_mut(), max);

            if pos < min {
                left.move_tail_to(min - 1, &mut right);
                left.insert_slot(pos, &key, &value);
            } else {
                left.move_tail_to(min, &mut right);
                right.insert_slot(pos - min, &key, &value);
            }

            // Link the new leaf into the chain before the separator is
            // published in the parent.
            right.set_next_leaf(left.next_leaf());
            left.set_next_leaf(right_id);
            separator = right.key_at(0);
        }

        debug!(left = %left_guard.page_id(), right = %right_id, "leaf split");
        Ok((separator, right_id))
    }

    /// Pushes `(separator, right_id)` up the retained latch chain,
    /// splitting internal pages as needed and growing the tree at the
    /// root.
    fn insert_into_parent(
        &self,
        ctx: &mut Context<'_>,
        reserve: &mut PageReserve<'_>,
        mut separator: K,
        mut right_id: PageId,
    ) -> Result<()> {
        loop {
            let Some(step) = ctx.path.pop() else {
                // Split reached the top of the retained chain: grow.
                let mut header = self.take_header(ctx)?;
                let (new_root_id, guard) = reserve.take()?;
                {
                    let mut guard = guard.upgrade_write();
                    let mut root =
                        InternalPageMut::<K>::init(guard.data_mut(), self.internal_max_size);
                    root.write_slot(0, &separator, ctx.root_page_id);
                    root.set_size(1);
                    root.insert_slot(1, &separator, right_id);
                }
                header::set_root_page_id(header.data_mut(), new_root_id);
                debug!(old_root = %ctx.root_page_id, new_root = %new_root_id, "root split");
                return Ok(());
            };

            let mut guard = step.guard;
            let idx = step.child_idx;

            let full = {
                let internal = InternalPage::<K>::new(guard.data());
                internal.size() == internal.max_size()
            };

            if !full {
                let mut internal = InternalPageMut::<K>::new(guard.data_mut());
                internal.insert_slot(idx + 1, &separator, right_id);
                return Ok(());
            }

            let (promoted, new_right) =
                self.split_internal(&mut guard, reserve, idx, separator, right_id)?;
            separator = promoted;
            right_id = new_right;
        }
    }

    /// Splits a full internal page around the pending `(separator,
    /// right_id)` insertion at `idx + 1`. Returns the promoted key and
    /// the new right page's ID.
    fn split_internal(
        &self,
        guard: &mut WritePageGuard<'_>,
        reserve: &mut PageReserve<'_>,
        idx: usize,
        separator: K,
        right_id: PageId,
    ) -> Result<(K, PageId)> {
        let (new_id, new_basic) = reserve.take()?;
        let mut new_guard = new_basic.upgrade_write();

        let mut left = InternalPageMut::<K>::new(guard.data_mut());
        let n = left.size();
        let max = left.max_size();
        let min = min_size_for(max);

        // Materialize the conceptual (max + 1)-child sequence. The
        // reserved slot-0 key is padded with the separator; it is never
        // consulted.
        let mut children: Vec<PageId> = (0..n).map(|i| left.child_at(i)).collect();
        let mut keys: Vec<K> = Vec::with_capacity(n + 1);
        keys.push(separator);
        for i in 1..n {
            keys.push(left.key_at(i));
        }
        children.insert(idx + 1, right_id);
        keys.insert(idx + 1, separator);

        let left_count = n + 1 - min;
        let promoted = keys[left_count];

        for i in 0..left_count {
            left.write_slot(i, &keys[i], children[i]);
        }
        left.set_size(left_count);

        let mut right = InternalPageMut::<K>::init(new_guard.data_mut(), max);
        for j in 0..(n + 1 - left_count) {
            right.write_slot(j, &keys[left_count + j], children[left_count + j]);
        }
        right.set_size(n + 1 - left_count);

        debug!(left = %guard.page_id(), right = %new_id, "internal split");
        Ok((promoted, new_id))
    }

    // -----------------------------------------------------------------
    // Remove internals
    // -----------------------------------------------------------------

    /// Empties the header after the last key left a leaf root.
    fn clear_root(&self, ctx: &mut Context<'_>) -> Result<()> {
        let mut header = self.take_header(ctx)?;
        header::set_root_page_id(header.data_mut(), PageId::INVALID);

        let step = ctx.path.pop().ok_or_else(|| {
            TesseraError::Internal("write descent produced no leaf".to_string())
        })?;
        let mut guard = step.guard;
        set_page_kind(guard.data_mut(), PageKind::Invalid);
        let root_id = guard.page_id();
        drop(guard);
        drop(header);

        self.deallocate(root_id)?;
        debug!(root = %root_id, "tree emptied");
        Ok(())
    }

    /// Latches the sibling each level of a pending rebalance cascade
    /// would pull from. The cascade climbs exactly through the pages
    /// sitting at minimum occupancy, so those are the levels that need
    /// a sibling; the first level above them absorbs the separator
    /// erase without rebalancing. Siblings come from the parent's child
    /// array, never from the leaf chain. Returned innermost-last, so
    /// `pop()` follows the cascade order.
    fn prelatch_rebalance_siblings<'a>(
        &'a self,
        ctx: &Context<'a>,
    ) -> Result<Vec<(bool, WritePageGuard<'a>)>> {
        let mut out = Vec::new();
        for level in (1..ctx.path.len()).rev() {
            let step = &ctx.path[level];
            let data = step.guard.data();
            let at_minimum = match page_kind(data) {
                Some(PageKind::Leaf) => {
                    let v = LeafPage::<K, V>::new(data);
                    v.size() == v.min_size()
                }
                Some(PageKind::Internal) => {
                    let v = InternalPage::<K>::new(data);
                    v.size() == v.min_size()
                }
                _ => {
                    return Err(TesseraError::corrupted(
                        step.guard.page_id(),
                        "unknown page kind on rebalance path",
                    ))
                }
            };
            if !at_minimum {
                break;
            }

            let parent = &ctx.path[level - 1];
            let parent_view = InternalPage::<K>::new(parent.guard.data());
            let (sibling_id, sibling_is_left) = if parent.child_idx >= 1 {
                (parent_view.child_at(parent.child_idx - 1), true)
            } else {
                (parent_view.child_at(1), false)
            };
            out.push((sibling_is_left, self.bpm.fetch_write(sibling_id)?));
        }
        out.reverse();
        Ok(out)
    }

    /// Rebalances upward from the deficient page at the top of the
    /// path, consuming the pre-latched sibling guards.
    fn resolve_underflow<'a>(
        &'a self,
        ctx: &mut Context<'a>,
        mut siblings: Vec<(bool, WritePageGuard<'a>)>,
    ) -> Result<()> {
        loop {
            let step = ctx.path.pop().ok_or_else(|| {
                TesseraError::Internal("underflow path lost its latched page".to_string())
            })?;
            let mut child_guard = step.guard;
            let child_id = child_guard.page_id();

            if ctx.is_root(child_id) {
                return self.collapse_root(ctx, child_guard);
            }

            let parent = ctx.path.last_mut().ok_or_else(|| {
                TesseraError::Internal(
                    "non-root underflow without a latched parent".to_string(),
                )
            })?;
            // The parent's recorded descent slot names this child.
            let parent_idx = parent.child_idx;

            let (sibling_is_left, mut sibling_guard) = siblings.pop().ok_or_else(|| {
                TesseraError::Internal("rebalance outran its pre-latched siblings".to_string())
            })?;

            let (sibling_size, sibling_min) = match page_kind(sibling_guard.data()) {
                Some(PageKind::Leaf) => {
                    let v = LeafPage::<K, V>::new(sibling_guard.data());
                    (v.size(), v.min_size())
                }
                Some(PageKind::Internal) => {
                    let v = InternalPage::<K>::new(sibling_guard.data());
                    (v.size(), v.min_size())
                }
                _ => {
                    return Err(TesseraError::corrupted(
                        sibling_guard.page_id(),
                        "unknown page kind at rebalance sibling",
                    ))
                }
            };

            if sibling_size > sibling_min {
                self.redistribute(
                    parent,
                    parent_idx,
                    &mut child_guard,
                    &mut sibling_guard,
                    sibling_is_left,
                )?;
                return Ok(());
            }

            let removed_id =
                self.merge(parent, parent_idx, child_guard, sibling_guard, sibling_is_left)?;
            self.deallocate(removed_id)?;

            let parent_id = parent.guard.page_id();
            let parent_deficient = {
                let view = InternalPage::<K>::new(parent.guard.data());
                if parent_id == ctx.root_page_id {
                    view.size() == 1
                } else {
                    view.size() < view.min_size()
                }
            };
            if !parent_deficient {
                return Ok(());
            }
        }
    }

    /// Moves one entry across the boundary between a deficient page and
    /// its sibling, updating the parent separator.
    fn redistribute(
        &self,
        parent: &mut PathStep<'_>,
        parent_idx: usize,
        child_guard: &mut WritePageGuard<'_>,
        sibling_guard: &mut WritePageGuard<'_>,
        sibling_is_left: bool,
    ) -> Result<()> {
        let mut parent_view = InternalPageMut::<K>::new(parent.guard.data_mut());

        match page_kind(child_guard.data()) {
            Some(PageKind::Leaf) => {
                let mut child = LeafPageMut::<K, V>::new(child_guard.data_mut());
                let mut sibling = LeafPageMut::<K, V>::new(sibling_guard.data_mut());

                if sibling_is_left {
                    let last = sibling.size() - 1;
                    let key = sibling.key_at(last);
                    let value = sibling.value_at(last);
                    sibling.erase_slot(last);
                    child.insert_slot(0, &key, &value);
                    parent_view.set_key_at(parent_idx, &key);
                } else {
                    let key = sibling.key_at(0);
                    let value = sibling.value_at(0);
                    sibling.erase_slot(0);
                    child.insert_slot(child.size(), &key, &value);
                    parent_view.set_key_at(parent_idx + 1, &sibling.key_at(0));
                }
            }
            Some(PageKind::Internal) => {
                let mut child = InternalPageMut::<K>::new(child_guard.data_mut());
                let mut sibling = InternalPageMut::<K>::new(sibling_guard.data_mut());

                if sibling_is_left {
                    // The moved entry keeps its child; its key becomes
                    // the new separator and the old separator drops to
                    // the child's former slot-0 position.
                    let last = sibling.size() - 1;
                    let moved_key = sibling.key_at(last);
                    let moved_child = sibling.child_at(last);
                    let old_separator = parent_view.key_at(parent_idx);
                    sibling.erase_slot(last);
                    child.insert_slot(0, &moved_key, moved_child);
                    child.set_key_at(1, &old_separator);
                    parent_view.set_key_at(parent_idx, &moved_key);
                } else {
                    let old_separator = parent_view.key_at(parent_idx + 1);
                    let moved_child = sibling.child_at(0);
                    let next_separator = sibling.key_at(1);
                    child.insert_slot(child.size(), &old_separator, moved_child);
                    sibling.erase_slot(0);
                    parent_view.set_key_at(parent_idx + 1, &next_separator);
                }
            }
            _ => {
                return Err(TesseraError::corrupted(
                    child_guard.page_id(),
                    "unknown page kind at rebalance child",
                ))
            }
        }

        debug!(
            page = %child_guard.page_id(),
            sibling = %sibling_guard.page_id(),
            "redistributed one entry"
        );
        Ok(())
    }

    /// Concatenates the deficient page with its sibling (right into
    /// left), erases the separator from the parent, and returns the ID
    /// of the emptied page for deallocation.
    fn merge(
        &self,
        parent: &mut PathStep<'_>,
        parent_idx: usize,
        child_guard: WritePageGuard<'_>,
        sibling_guard: WritePageGuard<'_>,
        sibling_is_left: bool,
    ) -> Result<PageId> {
        let mut parent_view = InternalPageMut::<K>::new(parent.guard.data_mut());

        // Normalize to (left, right) in key order; the right page is
        // always the one emptied.
        let (mut left_guard, mut right_guard, right_parent_idx) = if sibling_is_left {
            (sibling_guard, child_guard, parent_idx)
        } else {
            (child_guard, sibling_guard, parent_idx + 1)
        };

        match page_kind(left_guard.data()) {
            Some(PageKind::Leaf) => {
                let mut left = LeafPageMut::<K, V>::new(left_guard.data_mut());
                let mut right = LeafPageMut::<K, V>::new(right_guard.data_mut());
                right.move_tail_to(0, &mut left);
                // Splice the emptied leaf out of the chain before it is
                // deallocated.
                left.set_next_leaf(right.next_leaf());
            }
            Some(PageKind::Internal) => {
                let mut left = InternalPageMut::<K>::new(left_guard.data_mut());
                let mut right = InternalPageMut::<K>::new(right_guard.data_mut());
                // Demote the separator onto the right page's slot-0
                // child before concatenating.
                let separator = parent_view.key_at(right_parent_idx);
                let slot0_child = right.child_at(0);
                right.write_slot(0, &separator, slot0_child);
                right.move_tail_to(0, &mut left);
            }
            _ => {
                return Err(TesseraError::corrupted(
                    left_guard.page_id(),
                    "unknown page kind at merge",
                ))
            }
        }

        parent_view.erase_slot(right_parent_idx);

        let removed_id = right_guard.page_id();
        set_page_kind(right_guard.data_mut(), PageKind::Invalid);

        debug!(
            into = %left_guard.page_id(),
            removed = %removed_id,
            "merged siblings"
        );

        drop(right_guard);
        drop(left_guard);
        Ok(removed_id)
    }

    /// Replaces an internal root holding a single child with that
    /// child, shrinking the tree by one level.
    fn collapse_root(&self, ctx: &mut Context<'_>, mut root_guard: WritePageGuard<'_>) -> Result<()> {
        let collapse = {
            match page_kind(root_guard.data()) {
                Some(PageKind::Internal) => {
                    InternalPage::<K>::new(root_guard.data()).size() == 1
                }
                _ => false,
            }
        };
        if !collapse {
            return Ok(());
        }

        let mut header = self.take_header(ctx)?;
        let only_child = InternalPage::<K>::new(root_guard.data()).child_at(0);
        header::set_root_page_id(header.data_mut(), only_child);

        let old_root = root_guard.page_id();
        set_page_kind(root_guard.data_mut(), PageKind::Invalid);
        drop(root_guard);
        drop(header);

        self.deallocate(old_root)?;
        debug!(old_root = %old_root, new_root = %only_child, "root collapsed");
        Ok(())
    }

    /// Returns a structurally unlinked page to the buffer manager. A
    /// racing scan may still pin the page for a moment; the deletion is
    /// skipped then (the page stays tagged invalid).
    fn deallocate(&self, page_id: PageId) -> Result<()> {
        match self.bpm.delete_page(page_id) {
            Ok(()) => Ok(()),
            Err(TesseraError::PagePinned { .. }) => {
                debug!(page = %page_id, "deferred page delete; still pinned");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
