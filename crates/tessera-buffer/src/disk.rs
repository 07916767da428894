//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use tessera_common::config::DiskManagerConfig;
use tessera_common::page::{PageId, PAGE_SIZE};
use tessera_common::Result;

/// Manages reading and writing pages of a single index file.
///
/// Pages are allocated by extending an atomic page counter; the file
/// itself grows lazily on first write. Reading a page that was allocated
/// but never written yields zeroes.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// The index file, serialized for seek+read/write pairs.
    file: Mutex<File>,
    /// Number of allocated pages.
    num_pages: AtomicU32,
}

impl DiskManager {
    /// Opens (or creates) the index file named by the config.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        if let Some(dir) = config.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.path)?;

        let len = file.metadata()?.len();
        let num_pages = (len as usize).div_ceil(PAGE_SIZE) as u32;

        Ok(Self {
            config,
            file: Mutex::new(file),
            num_pages: AtomicU32::new(num_pages),
        })
    }

    /// Opens a disk manager over the given path with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(DiskManagerConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    /// Returns the path of the index file.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Returns the number of allocated pages.
    pub fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Acquire)
    }

    /// Allocates a fresh page and returns its ID.
    pub fn allocate_page(&self) -> PageId {
        PageId::new(self.num_pages.fetch_add(1, Ordering::AcqRel))
    }

    /// Reads a page from disk.
    ///
    /// Pages past the current end of file read as zeroes.
    pub fn read_page(&self, page_id: PageId) -> Result<Box<[u8; PAGE_SIZE]>> {
        let mut buf = Box::new([0u8; PAGE_SIZE]);
        let offset = page_id.file_offset();

        let mut file = self.file.lock();
        let len = file.metadata()?.len();
        if offset >= len {
            return Ok(buf);
        }

        file.seek(SeekFrom::Start(offset))?;
        let available = ((len - offset) as usize).min(PAGE_SIZE);
        file.read_exact(&mut buf[..available])?;
        Ok(buf)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let offset = page_id.file_offset();

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        if self.config.fsync_enabled {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Flushes outstanding file data to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk() -> (tempfile::TempDir, DiskManager) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");
        let disk = DiskManager::new(DiskManagerConfig {
            path,
            fsync_enabled: false,
        })
        .unwrap();
        (dir, disk)
    }

    #[test]
    fn test_disk_manager_starts_empty() {
        let (_dir, disk) = create_test_disk();
        assert_eq!(disk.num_pages(), 0);
    }

    #[test]
    fn test_disk_manager_allocate_is_sequential() {
        let (_dir, disk) = create_test_disk();

        assert_eq!(disk.allocate_page(), PageId::new(0));
        assert_eq!(disk.allocate_page(), PageId::new(1));
        assert_eq!(disk.allocate_page(), PageId::new(2));
        assert_eq!(disk.num_pages(), 3);
    }

    #[test]
    fn test_disk_manager_write_read_roundtrip() {
        let (_dir, disk) = create_test_disk();
        let page_id = disk.allocate_page();

        let mut data = Box::new([0u8; PAGE_SIZE]);
        data[0] = 0xDE;
        data[PAGE_SIZE - 1] = 0xAD;
        disk.write_page(page_id, &data).unwrap();

        let read = disk.read_page(page_id).unwrap();
        assert_eq!(read[0], 0xDE);
        assert_eq!(read[PAGE_SIZE - 1], 0xAD);
    }

    #[test]
    fn test_disk_manager_unwritten_page_reads_zeroes() {
        let (_dir, disk) = create_test_disk();
        let page_id = disk.allocate_page();

        let read = disk.read_page(page_id).unwrap();
        assert!(read.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_sparse_write() {
        let (_dir, disk) = create_test_disk();

        for _ in 0..5 {
            disk.allocate_page();
        }

        // Write only page 3; pages 0-2 read back as zeroes.
        let mut data = Box::new([0u8; PAGE_SIZE]);
        data[100] = 42;
        disk.write_page(PageId::new(3), &data).unwrap();

        assert!(disk.read_page(PageId::new(1)).unwrap().iter().all(|&b| b == 0));
        assert_eq!(disk.read_page(PageId::new(3)).unwrap()[100], 42);
    }

    #[test]
    fn test_disk_manager_reopen_preserves_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.idx");

        {
            let disk = DiskManager::open(&path).unwrap();
            let pid = disk.allocate_page();
            let mut data = Box::new([0u8; PAGE_SIZE]);
            data[7] = 7;
            disk.write_page(pid, &data).unwrap();
        }

        let disk = DiskManager::open(&path).unwrap();
        assert_eq!(disk.num_pages(), 1);
        assert_eq!(disk.read_page(PageId::new(0)).unwrap()[7], 7);
    }
}
