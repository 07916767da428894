//! B+tree page layout and slot operations.
//!
//! Every tree page starts with a 12-byte common header:
//!
//! ```text
//! +--------------------+--------------+------------------+
//! | page_kind: u32     | size: i32    | max_size: i32    |
//! +--------------------+--------------+------------------+
//! ```
//!
//! Leaf pages extend it with a 4-byte `next_leaf_id` (slots start at
//! offset 16); internal page slots start at offset 12. The body is a
//! packed array of fixed-width slots:
//!
//! - leaf slot: `key | value`, with `size` entries in strictly
//!   increasing key order;
//! - internal slot: `key | child_page_id`, with `size` children and
//!   the key of slot 0 reserved and never read.
//!
//! The views below borrow page bytes from a latched guard; `LeafPage` /
//! `InternalPage` are read-only, the `*Mut` variants mutate in place.

use std::cmp::Ordering;
use std::marker::PhantomData;
use tessera_common::page::{PageId, PAGE_SIZE};
use tessera_common::{Result, TesseraError};

use crate::key::{KeyComparator, SlotData};

/// Length of the common page header.
pub const PAGE_HEADER_LEN: usize = 12;

/// Length of the leaf page header (common header + next_leaf_id).
pub const LEAF_HEADER_LEN: usize = 16;

const KIND_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 4;
const MAX_SIZE_OFFSET: usize = 8;
const NEXT_LEAF_OFFSET: usize = 12;

/// Discriminator stored in the first word of every tree page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PageKind {
    /// Unallocated or deallocated page.
    Invalid = 0,
    /// Leaf page: (key, value) entries plus the forward chain pointer.
    Leaf = 1,
    /// Internal page: (key, child) entries; slot 0's key is unused.
    Internal = 2,
}

impl PageKind {
    /// Decodes a raw discriminator; unknown values map to None.
    pub fn from_u32(raw: u32) -> Option<PageKind> {
        match raw {
            0 => Some(PageKind::Invalid),
            1 => Some(PageKind::Leaf),
            2 => Some(PageKind::Internal),
            _ => None,
        }
    }
}

/// Reads the page kind discriminator.
#[inline]
pub fn page_kind(data: &[u8]) -> Option<PageKind> {
    PageKind::from_u32(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}

/// Overwrites the page kind discriminator.
#[inline]
pub fn set_page_kind(data: &mut [u8], kind: PageKind) {
    data[KIND_OFFSET..KIND_OFFSET + 4].copy_from_slice(&(kind as u32).to_le_bytes());
}

#[inline]
fn read_size(data: &[u8]) -> usize {
    i32::from_le_bytes([
        data[SIZE_OFFSET],
        data[SIZE_OFFSET + 1],
        data[SIZE_OFFSET + 2],
        data[SIZE_OFFSET + 3],
    ]) as usize
}

#[inline]
fn write_size(data: &mut [u8], size: usize) {
    data[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&(size as i32).to_le_bytes());
}

#[inline]
fn read_max_size(data: &[u8]) -> usize {
    i32::from_le_bytes([
        data[MAX_SIZE_OFFSET],
        data[MAX_SIZE_OFFSET + 1],
        data[MAX_SIZE_OFFSET + 2],
        data[MAX_SIZE_OFFSET + 3],
    ]) as usize
}

#[inline]
fn write_max_size(data: &mut [u8], max_size: usize) {
    data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4].copy_from_slice(&(max_size as i32).to_le_bytes());
}

/// Minimum occupancy for a non-root page of the given capacity.
#[inline]
pub fn min_size_for(max_size: usize) -> usize {
    (max_size + 1) / 2
}

/// Largest leaf slot count that fits a page.
pub fn leaf_capacity<K: SlotData, V: SlotData>() -> usize {
    (PAGE_SIZE - LEAF_HEADER_LEN) / (K::WIDTH + V::WIDTH)
}

/// Largest internal slot count that fits a page.
pub fn internal_capacity<K: SlotData>() -> usize {
    (PAGE_SIZE - PAGE_HEADER_LEN) / (K::WIDTH + PageId::WIDTH)
}

// ---------------------------------------------------------------------------
// Leaf pages
// ---------------------------------------------------------------------------

/// Read-only view of a leaf page.
#[derive(Debug)]
pub struct LeafPage<'a, K, V> {
    data: &'a [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: SlotData, V: SlotData> LeafPage<'a, K, V> {
    const STRIDE: usize = K::WIDTH + V::WIDTH;

    /// Wraps page bytes without checking the discriminator.
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(page_kind(data), Some(PageKind::Leaf));
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Wraps page bytes, verifying the discriminator.
    pub fn try_from_page(page_id: PageId, data: &'a [u8]) -> Result<Self> {
        match page_kind(data) {
            Some(PageKind::Leaf) => Ok(Self {
                data,
                _marker: PhantomData,
            }),
            other => Err(TesseraError::UnexpectedPageType {
                page_id,
                expected: "leaf",
                found: other.map(|k| k as u32).unwrap_or(u32::MAX),
            }),
        }
    }

    /// Number of entries in use.
    pub fn size(&self) -> usize {
        read_size(self.data)
    }

    /// Maximum entries this page may hold.
    pub fn max_size(&self) -> usize {
        read_max_size(self.data)
    }

    /// Minimum entries a non-root leaf must hold.
    pub fn min_size(&self) -> usize {
        min_size_for(self.max_size())
    }

    /// Next leaf in the chain (INVALID at the tail).
    pub fn next_leaf(&self) -> PageId {
        PageId(u32::from_le_bytes([
            self.data[NEXT_LEAF_OFFSET],
            self.data[NEXT_LEAF_OFFSET + 1],
            self.data[NEXT_LEAF_OFFSET + 2],
            self.data[NEXT_LEAF_OFFSET + 3],
        ]))
    }

    #[inline]
    fn slot_offset(i: usize) -> usize {
        LEAF_HEADER_LEN + i * Self::STRIDE
    }

    /// Key at slot `i`.
    pub fn key_at(&self, i: usize) -> K {
        debug_assert!(i < self.size());
        K::read_from(&self.data[Self::slot_offset(i)..])
    }

    /// Value at slot `i`.
    pub fn value_at(&self, i: usize) -> V {
        debug_assert!(i < self.size());
        V::read_from(&self.data[Self::slot_offset(i) + K::WIDTH..])
    }

    /// Binary search. `Ok(i)` when the key sits in slot `i`, `Err(i)`
    /// with the insertion point otherwise.
    pub fn lookup<C: KeyComparator<K>>(&self, cmp: &C, key: &K) -> std::result::Result<usize, usize> {
        let mut lo = 0;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match cmp.compare(&self.key_at(mid), key) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }
}

/// Mutable view of a leaf page.
pub struct LeafPageMut<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: SlotData, V: SlotData> LeafPageMut<'a, K, V> {
    const STRIDE: usize = K::WIDTH + V::WIDTH;

    /// Wraps page bytes without checking the discriminator.
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(page_kind(data), Some(PageKind::Leaf));
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Wraps page bytes, verifying the discriminator.
    pub fn try_from_page(page_id: PageId, data: &'a mut [u8]) -> Result<Self> {
        match page_kind(data) {
            Some(PageKind::Leaf) => Ok(Self {
                data,
                _marker: PhantomData,
            }),
            other => Err(TesseraError::UnexpectedPageType {
                page_id,
                expected: "leaf",
                found: other.map(|k| k as u32).unwrap_or(u32::MAX),
            }),
        }
    }

    /// Formats fresh page bytes as an empty leaf.
    pub fn init(data: &'a mut [u8], max_size: usize) -> Self {
        set_page_kind(data, PageKind::Leaf);
        write_size(data, 0);
        write_max_size(data, max_size);
        data[NEXT_LEAF_OFFSET..NEXT_LEAF_OFFSET + 4]
            .copy_from_slice(&PageId::INVALID.0.to_le_bytes());
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Read-only reborrow of this view.
    pub fn as_view(&self) -> LeafPage<'_, K, V> {
        LeafPage::new(self.data)
    }

    /// Number of entries in use.
    pub fn size(&self) -> usize {
        read_size(self.data)
    }

    /// Maximum entries this page may hold.
    pub fn max_size(&self) -> usize {
        read_max_size(self.data)
    }

    /// Minimum entries a non-root leaf must hold.
    pub fn min_size(&self) -> usize {
        min_size_for(self.max_size())
    }

    /// Next leaf in the chain (INVALID at the tail).
    pub fn next_leaf(&self) -> PageId {
        self.as_view().next_leaf()
    }

    /// Sets the next-leaf pointer.
    pub fn set_next_leaf(&mut self, next: PageId) {
        self.data[NEXT_LEAF_OFFSET..NEXT_LEAF_OFFSET + 4].copy_from_slice(&next.0.to_le_bytes());
    }

    #[inline]
    fn slot_offset(i: usize) -> usize {
        LEAF_HEADER_LEN + i * Self::STRIDE
    }

    /// Key at slot `i`.
    pub fn key_at(&self, i: usize) -> K {
        self.as_view().key_at(i)
    }

    /// Value at slot `i`.
    pub fn value_at(&self, i: usize) -> V {
        self.as_view().value_at(i)
    }

    /// Overwrites the key in slot `i`.
    pub fn set_key_at(&mut self, i: usize, key: &K) {
        debug_assert!(i < self.size());
        key.write_to(&mut self.data[Self::slot_offset(i)..]);
    }

    /// Overwrites the value in slot `i`.
    pub fn set_value_at(&mut self, i: usize, value: &V) {
        debug_assert!(i < self.size());
        value.write_to(&mut self.data[Self::slot_offset(i) + K::WIDTH..]);
    }

    /// Inserts a (key, value) entry at slot `i`, shifting slots `>= i`
    /// right by one. The page must have room.
    pub fn insert_slot(&mut self, i: usize, key: &K, value: &V) {
        let size = self.size();
        debug_assert!(i <= size);

        let from = Self::slot_offset(i);
        let to = Self::slot_offset(size);
        self.data.copy_within(from..to, from + Self::STRIDE);

        key.write_to(&mut self.data[from..]);
        value.write_to(&mut self.data[from + K::WIDTH..]);
        write_size(self.data, size + 1);
    }

    /// Erases slot `i`, shifting slots `> i` left by one.
    pub fn erase_slot(&mut self, i: usize) {
        let size = self.size();
        debug_assert!(i < size);

        let from = Self::slot_offset(i + 1);
        let to = Self::slot_offset(size);
        self.data.copy_within(from..to, Self::slot_offset(i));
        write_size(self.data, size - 1);
    }

    /// Moves slots `start..size` to the end of `dst`, preserving order.
    pub fn move_tail_to(&mut self, start: usize, dst: &mut LeafPageMut<'_, K, V>) {
        let size = self.size();
        debug_assert!(start <= size);
        let count = size - start;
        let dst_size = dst.size();

        let src_from = Self::slot_offset(start);
        let src_to = Self::slot_offset(size);
        let dst_from = Self::slot_offset(dst_size);
        dst.data[dst_from..dst_from + (src_to - src_from)]
            .copy_from_slice(&self.data[src_from..src_to]);

        write_size(self.data, start);
        write_size(dst.data, dst_size + count);
    }

    /// Binary search; see [`LeafPage::lookup`].
    pub fn lookup<C: KeyComparator<K>>(&self, cmp: &C, key: &K) -> std::result::Result<usize, usize> {
        self.as_view().lookup(cmp, key)
    }
}

// ---------------------------------------------------------------------------
// Internal pages
// ---------------------------------------------------------------------------

/// Read-only view of an internal page.
pub struct InternalPage<'a, K> {
    data: &'a [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: SlotData> InternalPage<'a, K> {
    const STRIDE: usize = K::WIDTH + PageId::WIDTH;

    /// Wraps page bytes without checking the discriminator.
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(page_kind(data), Some(PageKind::Internal));
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Wraps page bytes, verifying the discriminator.
    pub fn try_from_page(page_id: PageId, data: &'a [u8]) -> Result<Self> {
        match page_kind(data) {
            Some(PageKind::Internal) => Ok(Self {
                data,
                _marker: PhantomData,
            }),
            other => Err(TesseraError::UnexpectedPageType {
                page_id,
                expected: "internal",
                found: other.map(|k| k as u32).unwrap_or(u32::MAX),
            }),
        }
    }

    /// Number of children.
    pub fn size(&self) -> usize {
        read_size(self.data)
    }

    /// Maximum children this page may hold.
    pub fn max_size(&self) -> usize {
        read_max_size(self.data)
    }

    /// Minimum children a non-root internal page must hold.
    pub fn min_size(&self) -> usize {
        min_size_for(self.max_size())
    }

    #[inline]
    fn slot_offset(i: usize) -> usize {
        PAGE_HEADER_LEN + i * Self::STRIDE
    }

    /// Routing key at slot `i`. Slot 0's key is reserved; callers must
    /// pass `i >= 1`.
    pub fn key_at(&self, i: usize) -> K {
        debug_assert!(i >= 1 && i < self.size());
        K::read_from(&self.data[Self::slot_offset(i)..])
    }

    /// Child page ID at slot `i`.
    pub fn child_at(&self, i: usize) -> PageId {
        debug_assert!(i < self.size());
        PageId::read_from(&self.data[Self::slot_offset(i) + K::WIDTH..])
    }

    /// Child index to descend into for `key`: the largest `i` with
    /// `key_at(i) <= key`, treating slot 0 as negative infinity.
    pub fn locate_child<C: KeyComparator<K>>(&self, cmp: &C, key: &K) -> usize {
        let mut lo = 1;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp.compare(&self.key_at(mid), key) != Ordering::Greater {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo - 1
    }
}

/// Mutable view of an internal page.
pub struct InternalPageMut<'a, K> {
    data: &'a mut [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: SlotData> InternalPageMut<'a, K> {
    const STRIDE: usize = K::WIDTH + PageId::WIDTH;

    /// Wraps page bytes without checking the discriminator.
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(page_kind(data), Some(PageKind::Internal));
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Wraps page bytes, verifying the discriminator.
    pub fn try_from_page(page_id: PageId, data: &'a mut [u8]) -> Result<Self> {
        match page_kind(data) {
            Some(PageKind::Internal) => Ok(Self {
                data,
                _marker: PhantomData,
            }),
            other => Err(TesseraError::UnexpectedPageType {
                page_id,
                expected: "internal",
                found: other.map(|k| k as u32).unwrap_or(u32::MAX),
            }),
        }
    }

    /// Formats fresh page bytes as an empty internal page.
    pub fn init(data: &'a mut [u8], max_size: usize) -> Self {
        set_page_kind(data, PageKind::Internal);
        write_size(data, 0);
        write_max_size(data, max_size);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Read-only reborrow of this view.
    pub fn as_view(&self) -> InternalPage<'_, K> {
        InternalPage::new(self.data)
    }

    /// Number of children.
    pub fn size(&self) -> usize {
        read_size(self.data)
    }

    /// Maximum children this page may hold.
    pub fn max_size(&self) -> usize {
        read_max_size(self.data)
    }

    /// Minimum children a non-root internal page must hold.
    pub fn min_size(&self) -> usize {
        min_size_for(self.max_size())
    }

    /// Sets the child count directly (bulk rebuilds only).
    pub fn set_size(&mut self, size: usize) {
        write_size(self.data, size);
    }

    #[inline]
    fn slot_offset(i: usize) -> usize {
        PAGE_HEADER_LEN + i * Self::STRIDE
    }

    /// Routing key at slot `i` (`i >= 1`).
    pub fn key_at(&self, i: usize) -> K {
        self.as_view().key_at(i)
    }

    /// Child page ID at slot `i`.
    pub fn child_at(&self, i: usize) -> PageId {
        self.as_view().child_at(i)
    }

    /// Overwrites the routing key in slot `i` (`i >= 1`).
    pub fn set_key_at(&mut self, i: usize, key: &K) {
        debug_assert!(i >= 1 && i < self.size());
        key.write_to(&mut self.data[Self::slot_offset(i)..]);
    }

    /// Overwrites the child pointer in slot `i`.
    pub fn set_child_at(&mut self, i: usize, child: PageId) {
        debug_assert!(i < self.size());
        child.write_to(&mut self.data[Self::slot_offset(i) + K::WIDTH..]);
    }

    /// Writes slot `i` wholesale (both key bytes and child pointer),
    /// without shifting. Used when rebuilding a page; `i` may equal the
    /// current size to append.
    pub fn write_slot(&mut self, i: usize, key: &K, child: PageId) {
        let off = Self::slot_offset(i);
        key.write_to(&mut self.data[off..]);
        child.write_to(&mut self.data[off + K::WIDTH..]);
    }

    /// Inserts a (key, child) entry at slot `i`, shifting slots `>= i`
    /// right by one. The page must have room.
    pub fn insert_slot(&mut self, i: usize, key: &K, child: PageId) {
        let size = self.size();
        debug_assert!(i <= size);

        let from = Self::slot_offset(i);
        let to = Self::slot_offset(size);
        self.data.copy_within(from..to, from + Self::STRIDE);

        key.write_to(&mut self.data[from..]);
        child.write_to(&mut self.data[from + K::WIDTH..]);
        write_size(self.data, size + 1);
    }

    /// Erases slot `i`, shifting slots `> i` left by one.
    pub fn erase_slot(&mut self, i: usize) {
        let size = self.size();
        debug_assert!(i < size);

        let from = Self::slot_offset(i + 1);
        let to = Self::slot_offset(size);
        self.data.copy_within(from..to, Self::slot_offset(i));
        write_size(self.data, size - 1);
    }

    /// Moves slots `start..size` to the end of `dst`, preserving order.
    /// Slot bytes move wholesale, so `dst` receives the keys as-is
    /// (including a reserved key landing in its slot 0 when `dst` was
    /// empty).
    pub fn move_tail_to(&mut self, start: usize, dst: &mut InternalPageMut<'_, K>) {
        let size = self.size();
        debug_assert!(start <= size);
        let count = size - start;
        let dst_size = dst.size();

        let src_from = Self::slot_offset(start);
        let src_to = Self::slot_offset(size);
        let dst_from = Self::slot_offset(dst_size);
        dst.data[dst_from..dst_from + (src_to - src_from)]
            .copy_from_slice(&self.data[src_from..src_to]);

        write_size(self.data, start);
        write_size(dst.data, dst_size + count);
    }

    /// Child index to descend into for `key`; see
    /// [`InternalPage::locate_child`].
    pub fn locate_child<C: KeyComparator<K>>(&self, cmp: &C, key: &K) -> usize {
        self.as_view().locate_child(cmp, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::DefaultComparator;

    fn fresh_page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn test_page_kind_roundtrip() {
        let mut data = fresh_page();
        assert_eq!(page_kind(&data), Some(PageKind::Invalid));

        set_page_kind(&mut data, PageKind::Leaf);
        assert_eq!(page_kind(&data), Some(PageKind::Leaf));

        set_page_kind(&mut data, PageKind::Internal);
        assert_eq!(page_kind(&data), Some(PageKind::Internal));
    }

    #[test]
    fn test_page_kind_rejects_garbage() {
        let mut data = fresh_page();
        data[0] = 0xFF;
        assert_eq!(page_kind(&data), None);
    }

    #[test]
    fn test_min_size_for() {
        assert_eq!(min_size_for(3), 2);
        assert_eq!(min_size_for(4), 2);
        assert_eq!(min_size_for(5), 3);
        assert_eq!(min_size_for(255), 128);
    }

    #[test]
    fn test_capacities_fit_page() {
        let leaf = leaf_capacity::<u64, u64>();
        assert!(LEAF_HEADER_LEN + leaf * 16 <= PAGE_SIZE);
        assert!(leaf > 1000);

        let internal = internal_capacity::<u64>();
        assert!(PAGE_HEADER_LEN + internal * 12 <= PAGE_SIZE);
        assert!(internal > 1000);
    }

    #[test]
    fn test_leaf_init() {
        let mut data = fresh_page();
        let leaf = LeafPageMut::<u64, u64>::init(&mut data, 8);

        assert_eq!(leaf.size(), 0);
        assert_eq!(leaf.max_size(), 8);
        assert_eq!(leaf.min_size(), 4);
        assert_eq!(leaf.next_leaf(), PageId::INVALID);
    }

    #[test]
    fn test_leaf_insert_keeps_sorted_order() {
        let cmp = DefaultComparator;
        let mut data = fresh_page();
        let mut leaf = LeafPageMut::<u64, u64>::init(&mut data, 8);

        for key in [50u64, 10, 30, 20, 40] {
            let at = leaf.lookup(&cmp, &key).unwrap_err();
            leaf.insert_slot(at, &key, &(key * 100));
        }

        assert_eq!(leaf.size(), 5);
        let keys: Vec<u64> = (0..5).map(|i| leaf.key_at(i)).collect();
        assert_eq!(keys, vec![10, 20, 30, 40, 50]);
        assert_eq!(leaf.value_at(2), 3000);
    }

    #[test]
    fn test_leaf_lookup() {
        let cmp = DefaultComparator;
        let mut data = fresh_page();
        let mut leaf = LeafPageMut::<u64, u64>::init(&mut data, 8);

        for (i, key) in [10u64, 20, 30].iter().enumerate() {
            leaf.insert_slot(i, key, &0);
        }

        assert_eq!(leaf.lookup(&cmp, &10), Ok(0));
        assert_eq!(leaf.lookup(&cmp, &30), Ok(2));
        assert_eq!(leaf.lookup(&cmp, &5), Err(0));
        assert_eq!(leaf.lookup(&cmp, &25), Err(2));
        assert_eq!(leaf.lookup(&cmp, &99), Err(3));
    }

    #[test]
    fn test_leaf_erase_slot() {
        let mut data = fresh_page();
        let mut leaf = LeafPageMut::<u64, u64>::init(&mut data, 8);

        for (i, key) in [10u64, 20, 30].iter().enumerate() {
            leaf.insert_slot(i, key, &(key * 2));
        }

        leaf.erase_slot(1);
        assert_eq!(leaf.size(), 2);
        assert_eq!(leaf.key_at(0), 10);
        assert_eq!(leaf.key_at(1), 30);
        assert_eq!(leaf.value_at(1), 60);
    }

    #[test]
    fn test_leaf_move_tail_to() {
        let mut left_data = fresh_page();
        let mut right_data = fresh_page();
        let mut left = LeafPageMut::<u64, u64>::init(&mut left_data, 8);
        let mut right = LeafPageMut::<u64, u64>::init(&mut right_data, 8);

        for (i, key) in [1u64, 2, 3, 4].iter().enumerate() {
            left.insert_slot(i, key, &(key + 100));
        }

        left.move_tail_to(2, &mut right);

        assert_eq!(left.size(), 2);
        assert_eq!(right.size(), 2);
        assert_eq!(right.key_at(0), 3);
        assert_eq!(right.key_at(1), 4);
        assert_eq!(right.value_at(0), 103);
    }

    #[test]
    fn test_leaf_next_pointer() {
        let mut data = fresh_page();
        let mut leaf = LeafPageMut::<u64, u64>::init(&mut data, 8);

        leaf.set_next_leaf(PageId::new(9));
        assert_eq!(leaf.next_leaf(), PageId::new(9));
    }

    #[test]
    fn test_leaf_try_from_page_checks_kind() {
        let mut data = fresh_page();
        InternalPageMut::<u64>::init(&mut data, 8);

        let err = LeafPage::<u64, u64>::try_from_page(PageId::new(1), &data).unwrap_err();
        assert!(matches!(err, TesseraError::UnexpectedPageType { .. }));
    }

    #[test]
    fn test_internal_insert_and_children() {
        let mut data = fresh_page();
        let mut page = InternalPageMut::<u64>::init(&mut data, 8);

        // Typical construction: slot 0's key is reserved; write it
        // wholesale and only ever read keys 1..size.
        page.write_slot(0, &0, PageId::new(100));
        page.set_size(1);
        page.insert_slot(1, &10, PageId::new(101));
        page.insert_slot(2, &20, PageId::new(102));

        assert_eq!(page.size(), 3);
        assert_eq!(page.child_at(0), PageId::new(100));
        assert_eq!(page.key_at(1), 10);
        assert_eq!(page.child_at(1), PageId::new(101));
        assert_eq!(page.key_at(2), 20);
        assert_eq!(page.child_at(2), PageId::new(102));
    }

    #[test]
    fn test_internal_locate_child() {
        let cmp = DefaultComparator;
        let mut data = fresh_page();
        let mut page = InternalPageMut::<u64>::init(&mut data, 8);

        page.write_slot(0, &0, PageId::new(100));
        page.set_size(1);
        page.insert_slot(1, &10, PageId::new(101));
        page.insert_slot(2, &20, PageId::new(102));

        // key < all routing keys -> leftmost child
        assert_eq!(page.locate_child(&cmp, &5), 0);
        // boundary: routing key equal to search key
        assert_eq!(page.locate_child(&cmp, &10), 1);
        assert_eq!(page.locate_child(&cmp, &15), 1);
        assert_eq!(page.locate_child(&cmp, &20), 2);
        // key > all routing keys -> rightmost child
        assert_eq!(page.locate_child(&cmp, &99), 2);
    }

    #[test]
    fn test_internal_erase_slot() {
        let mut data = fresh_page();
        let mut page = InternalPageMut::<u64>::init(&mut data, 8);

        page.write_slot(0, &0, PageId::new(100));
        page.set_size(1);
        page.insert_slot(1, &10, PageId::new(101));
        page.insert_slot(2, &20, PageId::new(102));

        page.erase_slot(1);
        assert_eq!(page.size(), 2);
        assert_eq!(page.child_at(0), PageId::new(100));
        assert_eq!(page.key_at(1), 20);
        assert_eq!(page.child_at(1), PageId::new(102));
    }

    #[test]
    fn test_internal_move_tail_to() {
        let mut left_data = fresh_page();
        let mut right_data = fresh_page();
        let mut left = InternalPageMut::<u64>::init(&mut left_data, 8);
        let mut right = InternalPageMut::<u64>::init(&mut right_data, 8);

        left.write_slot(0, &0, PageId::new(100));
        left.set_size(1);
        for i in 1..5u64 {
            left.insert_slot(i as usize, &(i * 10), PageId::new(100 + i as u32));
        }

        left.move_tail_to(3, &mut right);

        assert_eq!(left.size(), 3);
        assert_eq!(right.size(), 2);
        // Moved slot bytes carry their keys; right's slot 0 key (30) is
        // now reserved and unread.
        assert_eq!(right.child_at(0), PageId::new(103));
        assert_eq!(right.key_at(1), 40);
        assert_eq!(right.child_at(1), PageId::new(104));
    }

    #[test]
    fn test_internal_set_key_and_child() {
        let mut data = fresh_page();
        let mut page = InternalPageMut::<u64>::init(&mut data, 8);

        page.write_slot(0, &0, PageId::new(100));
        page.set_size(1);
        page.insert_slot(1, &10, PageId::new(101));

        page.set_key_at(1, &15);
        page.set_child_at(0, PageId::new(200));

        assert_eq!(page.key_at(1), 15);
        assert_eq!(page.child_at(0), PageId::new(200));
    }
}
