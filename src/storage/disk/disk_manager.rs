use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::info;

use crate::common::{PageId, PageKvError, Result, PAGE_SIZE};
use crate::storage::PageStore;

/// DiskManager is a file-backed page store.
/// Page `p` lives at byte offset `(p - 1) * PAGE_SIZE`; page id 0 is never stored.
///
/// The file records no per-slot state. Writing page `p` extends the file over
/// any skipped slots, and those read back as zero bytes (which decode as an
/// empty, unlinked leaf) rather than `PageNotFound`. Only ids past the end of
/// the file are missing.
pub struct DiskManager {
    /// The database file
    db_file: Mutex<File>,
    /// Path to the database file
    db_path: String,
    /// Number of page slots the file currently spans
    num_pages: AtomicU64,
    /// Number of disk reads performed
    num_reads: AtomicU64,
    /// Number of disk writes performed
    num_writes: AtomicU64,
}

impl DiskManager {
    /// Creates a new DiskManager for the given database file path.
    /// Creates the file if it doesn't exist.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let file_size = file.metadata()?.len();
        let num_pages = file_size / PAGE_SIZE as u64;
        info!(path = %path_str, num_pages, "opened database file");

        Ok(Self {
            db_file: Mutex::new(file),
            db_path: path_str,
            num_pages: AtomicU64::new(num_pages),
            num_reads: AtomicU64::new(0),
            num_writes: AtomicU64::new(0),
        })
    }

    fn offset_of(page_id: PageId) -> u64 {
        (page_id.as_u64() - 1) * PAGE_SIZE as u64
    }

    /// Returns the number of page slots the file spans.
    pub fn get_num_pages(&self) -> u64 {
        self.num_pages.load(Ordering::Acquire)
    }

    /// Returns the number of disk reads performed.
    pub fn get_num_reads(&self) -> u64 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of disk writes performed.
    pub fn get_num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }

    /// Returns the path to the database file.
    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }
}

impl PageStore for DiskManager {
    fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        if !page_id.is_valid() || page_id.as_u64() > self.get_num_pages() {
            return Err(PageKvError::PageNotFound(page_id));
        }

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(Self::offset_of(page_id)))?;
        file.read_exact(data)?;

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        if !page_id.is_valid() {
            return Err(PageKvError::PageNotFound(page_id));
        }

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(Self::offset_of(page_id)))?;
        file.write_all(data)?;
        file.flush()?;

        // Writing past the end extends the file; skipped slots read back as zeros.
        self.num_pages.fetch_max(page_id.as_u64(), Ordering::AcqRel);
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn max_page_id(&self) -> Option<PageId> {
        match self.get_num_pages() {
            0 => None,
            n => Some(PageId::new(n)),
        }
    }

    fn sync(&self) -> Result<()> {
        let file = self.db_file.lock();
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let file = self.db_file.get_mut();
        let _ = file.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_disk_manager_new() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(temp_file.path()).unwrap();
        assert_eq!(dm.get_num_pages(), 0);
        assert_eq!(dm.max_page_id(), None);
    }

    #[test]
    fn test_disk_manager_read_write() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(temp_file.path()).unwrap();

        let mut write_data = [0u8; PAGE_SIZE];
        write_data[0] = 42;
        write_data[100] = 255;
        write_data[PAGE_SIZE - 1] = 128;
        dm.write_page(PageId::new(1), &write_data).unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        dm.read_page(PageId::new(1), &mut read_data).unwrap();

        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
        assert_eq!(read_data[PAGE_SIZE - 1], 128);
        assert_eq!(dm.get_num_writes(), 1);
        assert_eq!(dm.get_num_reads(), 1);
    }

    #[test]
    fn test_disk_manager_out_of_order_writes() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(temp_file.path()).unwrap();

        let data = [9u8; PAGE_SIZE];
        dm.write_page(PageId::new(3), &data).unwrap();
        assert_eq!(dm.max_page_id(), Some(PageId::new(3)));

        // Slot 1 was never written but lies inside the file.
        let mut read_data = [1u8; PAGE_SIZE];
        dm.read_page(PageId::new(1), &mut read_data).unwrap();
        assert!(read_data.iter().all(|&b| b == 0));

        assert!(matches!(
            dm.read_page(PageId::new(4), &mut read_data),
            Err(PageKvError::PageNotFound(_))
        ));
    }

    #[test]
    fn test_disk_manager_rejects_sentinel() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(temp_file.path()).unwrap();

        let mut data = [0u8; PAGE_SIZE];
        assert!(dm.read_page(PageId::new(0), &mut data).is_err());
        assert!(dm.write_page(PageId::new(0), &data).is_err());
    }

    #[test]
    fn test_disk_manager_persistence() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        {
            let dm = DiskManager::new(&path).unwrap();
            let mut data = [0u8; PAGE_SIZE];
            data[0] = 123;
            dm.write_page(PageId::new(1), &data).unwrap();
        }

        {
            let dm = DiskManager::new(&path).unwrap();
            assert_eq!(dm.get_num_pages(), 1);

            let mut data = [0u8; PAGE_SIZE];
            dm.read_page(PageId::new(1), &mut data).unwrap();
            assert_eq!(data[0], 123);
        }
    }
}
