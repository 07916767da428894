//! Buffer pool manager.

use crate::disk::DiskManager;
use crate::frame::{BufferFrame, FrameId};
use crate::guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use sysinfo::System;
use tessera_common::config::BufferPoolConfig;
use tessera_common::page::{PageId, PAGE_SIZE};
use tessera_common::{Result, TesseraError};

/// Retries when an eviction candidate is re-pinned under our feet.
const MAX_EVICT_ATTEMPTS: usize = 8;

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping (lock-free page table)
/// - Free frame list for new pages
/// - Clock replacement for eviction, with dirty write-back to disk
/// - Pin counting for concurrent access
/// - Recycling of deallocated page IDs
///
/// Pages are handed out exclusively through guards: `BasicPageGuard`
/// (pinned, unlatched), `ReadPageGuard` (pinned + shared latch), and
/// `WritePageGuard` (pinned + exclusive latch).
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: PageTable,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: ClockReplacer,
    /// Backing store for page I/O.
    disk: Arc<DiskManager>,
    /// Makes [lookup, pin] atomic against [unmap, reuse]: pinners hold it
    /// shared, eviction and deletion hold it exclusive.
    table_latch: RwLock<()>,
    /// Serializes the miss path (frame acquisition and disk loads).
    alloc_lock: Mutex<()>,
    /// Deallocated page IDs available for reuse.
    free_pages: Mutex<Vec<PageId>>,
}

impl BufferPool {
    /// Creates a new buffer pool over the given disk manager.
    pub fn new(config: BufferPoolConfig, disk: Arc<DiskManager>) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list.
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
            disk,
            table_latch: RwLock::new(()),
            alloc_lock: Mutex::new(()),
            free_pages: Mutex::new(Vec::new()),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM,
    /// with a floor of 1,000 frames.
    pub fn auto_sized(disk: Arc<DiskManager>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(BufferPoolConfig { num_frames }, disk)
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks if a page is resident in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(page_id)
    }

    /// Returns the underlying disk manager.
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Allocates and pins a fresh page with zeroed contents.
    ///
    /// The returned guard is unlatched; callers upgrade it to latch the
    /// page before initializing it.
    pub fn new_page(&self) -> Result<(PageId, BasicPageGuard<'_>)> {
        let _alloc = self.alloc_lock.lock();

        let recycled = self.free_pages.lock().pop();
        let page_id = recycled.unwrap_or_else(|| self.disk.allocate_page());

        let frame_id = match self.acquire_frame() {
            Ok(frame_id) => frame_id,
            Err(e) => {
                self.free_pages.lock().push(page_id);
                return Err(e);
            }
        };

        let frame = &self.frames[frame_id.0 as usize];
        frame.set_page_id(Some(page_id));
        // A fresh frame must reach disk even if the caller never writes;
        // the backing sectors may hold a recycled page's old bytes.
        frame.set_dirty(true);
        frame.pin();
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);

        Ok((page_id, BasicPageGuard::new(self, page_id, frame)))
    }

    /// Pins a page and returns an unlatched guard.
    pub fn fetch_basic(&self, page_id: PageId) -> Result<BasicPageGuard<'_>> {
        let frame = self.fetch_frame(page_id)?;
        Ok(BasicPageGuard::new(self, page_id, frame))
    }

    /// Pins a page and acquires its shared latch.
    pub fn fetch_read(&self, page_id: PageId) -> Result<ReadPageGuard<'_>> {
        Ok(self.fetch_basic(page_id)?.upgrade_read())
    }

    /// Pins a page and acquires its exclusive latch.
    pub fn fetch_write(&self, page_id: PageId) -> Result<WritePageGuard<'_>> {
        Ok(self.fetch_basic(page_id)?.upgrade_write())
    }

    /// Deletes a page from the pool and recycles its ID.
    ///
    /// The page must be unpinned. Its buffered contents are discarded;
    /// a later `new_page` may hand the ID out again.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let _alloc = self.alloc_lock.lock();
        {
            let _table = self.table_latch.write();
            if let Some(frame_id) = self.page_table.get(page_id) {
                let frame = &self.frames[frame_id.0 as usize];
                if frame.pin_count() != 0 {
                    return Err(TesseraError::PagePinned { page_id });
                }
                self.page_table.remove(page_id);
                self.replacer.remove(frame_id);
                frame.reset();
                self.free_list.lock().push(frame_id);
            }
        }
        self.free_pages.lock().push(page_id);
        Ok(())
    }

    /// Writes all dirty resident pages back to disk.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_all(&self) -> Result<usize> {
        let mut resident = Vec::new();
        self.page_table.for_each(|page_id, frame_id| {
            resident.push((page_id, frame_id));
            true
        });

        let mut flushed = 0;
        for (page_id, frame_id) in resident {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.latch_read();
                self.disk.write_page(page_id, &data)?;
                frame.set_dirty(false);
                flushed += 1;
            }
        }
        self.disk.sync()?;
        Ok(flushed)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned_count = 0;
        let mut dirty_count = 0;

        self.page_table.for_each(|_, frame_id| {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_count += 1;
            }
            if frame.is_dirty() {
                dirty_count += 1;
            }
            true
        });

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_count(),
            used_frames: self.page_table.len(),
            pinned_frames: pinned_count,
            dirty_frames: dirty_count,
        }
    }

    /// Unpins a frame on guard drop; `dirty` propagates the guard's
    /// write-through flag to the frame.
    pub(crate) fn unpin_frame(&self, frame: &BufferFrame, dirty: bool) {
        if dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame.frame_id(), true);
        }
    }

    /// Fast path: pin a resident page under the shared table latch.
    fn try_pin_resident(&self, page_id: PageId) -> Option<&BufferFrame> {
        let _table = self.table_latch.read();
        let frame_id = self.page_table.get(page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.pin();
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        Some(frame)
    }

    /// Pins the frame holding `page_id`, loading it from disk on a miss.
    fn fetch_frame(&self, page_id: PageId) -> Result<&BufferFrame> {
        if !page_id.is_valid() {
            return Err(TesseraError::PageNotFound(page_id));
        }

        if let Some(frame) = self.try_pin_resident(page_id) {
            return Ok(frame);
        }

        let _alloc = self.alloc_lock.lock();

        // Another thread may have loaded the page while we waited.
        if let Some(frame) = self.try_pin_resident(page_id) {
            return Ok(frame);
        }

        if page_id.0 >= self.disk.num_pages() {
            return Err(TesseraError::PageNotFound(page_id));
        }

        let frame_id = self.acquire_frame()?;
        let frame = &self.frames[frame_id.0 as usize];

        match self.disk.read_page(page_id) {
            Ok(data) => frame.copy_from(&data[..]),
            Err(e) => {
                self.free_list.lock().push(frame_id);
                return Err(e);
            }
        }

        frame.set_page_id(Some(page_id));
        frame.pin();
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);

        Ok(frame)
    }

    /// Produces an empty, unmapped, unpinned frame.
    ///
    /// Tries the free list first, then evicts (writing back a dirty
    /// victim). Caller must hold `alloc_lock`.
    fn acquire_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok(frame_id);
        }

        for _ in 0..MAX_EVICT_ATTEMPTS {
            let claimed = {
                let _table = self.table_latch.write();
                let victim = self
                    .replacer
                    .evict(&|fid| self.frames[fid.0 as usize].pin_count() == 0);
                match victim {
                    None => return Err(TesseraError::BufferPoolFull),
                    Some(victim) => {
                        let frame = &self.frames[victim.0 as usize];
                        let old_page = frame.page_id();
                        if let Some(old) = old_page {
                            self.page_table.remove(old);
                        }
                        if frame.pin_count() != 0 {
                            // Re-pinned before we took the table latch.
                            if let Some(old) = old_page {
                                self.page_table.insert(old, victim);
                            }
                            None
                        } else {
                            Some((victim, old_page))
                        }
                    }
                }
            };

            let Some((victim, old_page)) = claimed else {
                continue;
            };

            // The frame is now unreachable and unpinned: private to us.
            let frame = &self.frames[victim.0 as usize];
            if frame.is_dirty() {
                if let Some(old) = old_page {
                    let data = frame.latch_read();
                    if let Err(e) = self.disk.write_page(old, &data) {
                        // Keep the dirty page reachable for a later retry.
                        drop(data);
                        self.page_table.insert(old, victim);
                        self.replacer.set_evictable(victim, true);
                        return Err(e);
                    }
                }
            }
            frame.reset();
            return Ok(victim);
        }

        Err(TesseraError::BufferPoolFull)
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}
