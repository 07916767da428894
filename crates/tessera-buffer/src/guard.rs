//! RAII page guards.
//!
//! Three flavors over a pinned page:
//! - [`BasicPageGuard`]: pin only, no latch. Returned by `new_page` and
//!   upgradable into the latched flavors.
//! - [`ReadPageGuard`]: pin + shared latch for the guard's lifetime.
//! - [`WritePageGuard`]: pin + exclusive latch; mutable access marks the
//!   page dirty so the pool writes it back on eviction.
//!
//! On every exit path a guard releases the latch first and unpins second.

use crate::frame::BufferFrame;
use crate::pool::BufferPool;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use std::mem::ManuallyDrop;
use tessera_common::page::{PageId, PAGE_SIZE};

/// Scoped handle over a pinned, unlatched page.
pub struct BasicPageGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a BufferFrame,
}

impl<'a> std::fmt::Debug for BasicPageGuard<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicPageGuard")
            .field("page_id", &self.page_id)
            .finish()
    }
}

impl<'a> BasicPageGuard<'a> {
    pub(crate) fn new(pool: &'a BufferPool, page_id: PageId, frame: &'a BufferFrame) -> Self {
        Self {
            pool,
            page_id,
            frame,
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Acquires the page's shared latch, keeping the pin.
    pub fn upgrade_read(self) -> ReadPageGuard<'a> {
        let this = ManuallyDrop::new(self);
        ReadPageGuard {
            pool: this.pool,
            page_id: this.page_id,
            frame: this.frame,
            latch: ManuallyDrop::new(this.frame.latch_read()),
        }
    }

    /// Acquires the page's exclusive latch, keeping the pin.
    pub fn upgrade_write(self) -> WritePageGuard<'a> {
        let this = ManuallyDrop::new(self);
        WritePageGuard {
            pool: this.pool,
            page_id: this.page_id,
            frame: this.frame,
            latch: ManuallyDrop::new(this.frame.latch_write()),
            dirty: false,
        }
    }
}

impl Drop for BasicPageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_frame(self.frame, false);
    }
}

/// Scoped handle over a pinned page with its shared latch held.
pub struct ReadPageGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a BufferFrame,
    latch: ManuallyDrop<RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>>,
}

impl<'a> ReadPageGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // Latch released before the unpin makes the frame evictable.
        unsafe { ManuallyDrop::drop(&mut self.latch) };
        self.pool.unpin_frame(self.frame, false);
    }
}

/// Scoped handle over a pinned page with its exclusive latch held.
pub struct WritePageGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a BufferFrame,
    latch: ManuallyDrop<RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>>,
    dirty: bool,
}

impl<'a> WritePageGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }

    /// Returns mutable page data and marks the guard dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.latch[..]
    }

    /// Returns true if the page was written through this guard.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        let dirty = self.dirty;
        // Latch released before the unpin makes the frame evictable.
        unsafe { ManuallyDrop::drop(&mut self.latch) };
        self.pool.unpin_frame(self.frame, dirty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tessera_common::config::{BufferPoolConfig, DiskManagerConfig};

    fn create_test_pool() -> (tempfile::TempDir, BufferPool) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                path: dir.path().join("guard.idx"),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let pool = BufferPool::new(BufferPoolConfig { num_frames: 8 }, disk);
        (dir, pool)
    }

    #[test]
    fn test_basic_guard_unpins_on_drop() {
        let (_dir, pool) = create_test_pool();

        let (_pid, guard) = pool.new_page().unwrap();
        assert_eq!(pool.stats().pinned_frames, 1);

        drop(guard);
        assert_eq!(pool.stats().pinned_frames, 0);
    }

    #[test]
    fn test_upgrade_keeps_single_pin() {
        let (_dir, pool) = create_test_pool();

        let (pid, guard) = pool.new_page().unwrap();
        let write = guard.upgrade_write();
        assert_eq!(pool.stats().pinned_frames, 1);
        assert_eq!(write.page_id(), pid);

        drop(write);
        assert_eq!(pool.stats().pinned_frames, 0);
    }

    #[test]
    fn test_write_guard_marks_dirty_only_on_mutation() {
        let (_dir, pool) = create_test_pool();

        // Untouched write guard leaves the new-page dirty bit as-is;
        // fetch it again after a flush to observe guard-driven dirtiness.
        let (pid, guard) = pool.new_page().unwrap();
        drop(guard.upgrade_write());
        pool.flush_all().unwrap();
        assert_eq!(pool.stats().dirty_frames, 0);

        {
            let write = pool.fetch_write(pid).unwrap();
            assert!(!write.is_dirty());
        }
        assert_eq!(pool.stats().dirty_frames, 0);

        {
            let mut write = pool.fetch_write(pid).unwrap();
            write.data_mut()[0] = 1;
            assert!(write.is_dirty());
        }
        assert_eq!(pool.stats().dirty_frames, 1);
    }

    #[test]
    fn test_read_guards_are_shared() {
        let (_dir, pool) = create_test_pool();

        let (pid, guard) = pool.new_page().unwrap();
        drop(guard);

        let r1 = pool.fetch_read(pid).unwrap();
        let r2 = pool.fetch_read(pid).unwrap();
        assert_eq!(r1.data()[0], r2.data()[0]);
        assert_eq!(pool.stats().pinned_frames, 1);
    }

    #[test]
    fn test_write_guard_blocks_readers() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Barrier;

        let (_dir, pool) = create_test_pool();
        let (pid, guard) = pool.new_page().unwrap();
        drop(guard);

        let pool = Arc::new(pool);
        let barrier = Arc::new(Barrier::new(2));
        let reader_done = Arc::new(AtomicBool::new(false));

        let mut write = pool.fetch_write(pid).unwrap();
        write.data_mut()[0] = 1;

        let handle = {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            let reader_done = Arc::clone(&reader_done);
            std::thread::spawn(move || {
                barrier.wait();
                let read = pool.fetch_read(pid).unwrap();
                assert_eq!(read.data()[0], 2);
                reader_done.store(true, Ordering::SeqCst);
            })
        };

        barrier.wait();
        std::thread::sleep(std::time::Duration::from_millis(50));
        // Reader must still be blocked on our exclusive latch.
        assert!(!reader_done.load(Ordering::SeqCst));

        write.data_mut()[0] = 2;
        drop(write);

        handle.join().unwrap();
        assert!(reader_done.load(Ordering::SeqCst));
    }
}
