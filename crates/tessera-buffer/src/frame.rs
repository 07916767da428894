//! Buffer frames.
//!
//! A frame is one page-sized slot of pool memory plus the bookkeeping
//! the pool needs to manage it: which page is loaded, how many guards
//! pin it, and whether it diverged from its on-disk image. The
//! `RwLock` wrapping the bytes doubles as the page latch: read guards
//! hold it shared, write guards hold it exclusive.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tessera_common::page::{PageId, PAGE_SIZE};

/// Unique identifier for a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl FrameId {
    /// Invalid frame ID.
    pub const INVALID: FrameId = FrameId(u32::MAX);

    /// Returns true if this is a valid frame ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// One pool slot: page bytes behind the page latch, plus metadata.
pub struct BufferFrame {
    frame_id: FrameId,
    /// Page currently loaded (INVALID means the frame is empty).
    page_id: AtomicU32,
    /// Guards currently holding this frame.
    pin_count: AtomicU32,
    /// Set when the buffered bytes differ from the on-disk page.
    dirty: AtomicBool,
    /// Page bytes; the lock is the page's reader/writer latch.
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl BufferFrame {
    /// Creates an empty frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU32::new(PageId::INVALID.0),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the loaded page's ID, or None for an empty frame.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        match PageId(self.page_id.load(Ordering::Acquire)) {
            PageId::INVALID => None,
            id => Some(id),
        }
    }

    /// Records which page the frame holds.
    #[inline]
    pub fn set_page_id(&self, page_id: Option<PageId>) {
        self.page_id
            .store(page_id.unwrap_or(PageId::INVALID).0, Ordering::Release);
    }

    /// Returns true if the frame holds no page.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.page_id().is_none()
    }

    /// Adds a pin; returns the previous pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel)
    }

    /// Drops a pin; returns the new pin count. Saturates at zero.
    #[inline]
    pub fn unpin(&self) -> u32 {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .map(|prev| prev - 1)
            .unwrap_or(0)
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Returns true while any guard pins this frame.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns true if the buffered bytes must be written back.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets or clears the write-back flag.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Takes the page latch in shared mode.
    #[inline]
    pub fn latch_read(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Takes the page latch in exclusive mode.
    #[inline]
    pub fn latch_write(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Fills the frame from `src` (at most one page).
    #[inline]
    pub fn copy_from(&self, src: &[u8]) {
        let len = src.len().min(PAGE_SIZE);
        self.data.write()[..len].copy_from_slice(&src[..len]);
    }

    /// Returns the frame to its empty state, zeroing the bytes.
    pub fn reset(&self) {
        self.page_id.store(PageId::INVALID.0, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_id_validity_and_display() {
        assert!(FrameId(0).is_valid());
        assert!(!FrameId::INVALID.is_valid());
        assert_eq!(FrameId(42).to_string(), "frame:42");
    }

    #[test]
    fn test_fresh_frame_is_empty_and_clean() {
        let frame = BufferFrame::new(FrameId(3));

        assert_eq!(frame.frame_id(), FrameId(3));
        assert!(frame.is_empty());
        assert!(!frame.is_pinned());
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_pin_unpin_counting() {
        let frame = BufferFrame::new(FrameId(0));

        assert_eq!(frame.pin(), 0);
        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin_count(), 2);

        assert_eq!(frame.unpin(), 1);
        assert_eq!(frame.unpin(), 0);
        assert!(!frame.is_pinned());

        // Saturates rather than wrapping.
        assert_eq!(frame.unpin(), 0);
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_page_id_tracking() {
        let frame = BufferFrame::new(FrameId(0));

        frame.set_page_id(Some(PageId::new(100)));
        assert_eq!(frame.page_id(), Some(PageId::new(100)));
        assert!(!frame.is_empty());

        frame.set_page_id(None);
        assert!(frame.is_empty());
    }

    #[test]
    fn test_latch_and_data_roundtrip() {
        let frame = BufferFrame::new(FrameId(0));

        frame.latch_write()[0] = 0xAB;
        assert_eq!(frame.latch_read()[0], 0xAB);

        // Shared latch admits two readers at once.
        let r1 = frame.latch_read();
        let r2 = frame.latch_read();
        assert_eq!(r1[0], r2[0]);
    }

    #[test]
    fn test_copy_from_truncates_to_page() {
        let frame = BufferFrame::new(FrameId(0));

        frame.copy_from(&[1, 2, 3]);
        let data = frame.latch_read();
        assert_eq!(&data[..4], &[1, 2, 3, 0]);
    }

    #[test]
    fn test_reset_clears_everything() {
        let frame = BufferFrame::new(FrameId(0));

        frame.set_page_id(Some(PageId::new(1)));
        frame.pin();
        frame.set_dirty(true);
        frame.latch_write()[0] = 0xFF;

        frame.reset();

        assert!(frame.is_empty());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert_eq!(frame.latch_read()[0], 0);
    }

    #[test]
    fn test_debug_output() {
        let frame = BufferFrame::new(FrameId(5));
        frame.set_page_id(Some(PageId::new(10)));
        frame.pin();

        let rendered = format!("{:?}", frame);
        assert!(rendered.contains("frame_id"));
        assert!(rendered.contains("pin_count"));
    }
}
