use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::{PageId, PageKvError, Result, PAGE_SIZE};

/// The persistence layer beneath the buffer pool: raw page bytes addressed by
/// page identifier only.
///
/// Buffers passed in and out are always exactly `PAGE_SIZE` bytes.
pub trait PageStore: Send + Sync {
    /// Fills `data` with the stored bytes of `page_id`.
    /// Fails with `PageNotFound` if the page lies beyond what the store holds.
    ///
    /// Whether a never-written id below the highest stored one is found is
    /// store-specific: `MemoryPageStore` reports it missing, while
    /// `DiskManager` returns the zero-filled slot of the file.
    fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()>;

    /// Stores `data` as the contents of `page_id`, replacing any previous bytes.
    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Highest page id persisted so far, used to resume allocation.
    fn max_page_id(&self) -> Option<PageId>;

    /// Forces written pages to durable storage.
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory page store keyed by page id.
#[derive(Default)]
pub struct MemoryPageStore {
    pages: Mutex<HashMap<PageId, Box<[u8; PAGE_SIZE]>>>,
    num_reads: AtomicU64,
    num_writes: AtomicU64,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the store holds bytes for `page_id`.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.pages.lock().contains_key(&page_id)
    }

    /// Returns a copy of the stored bytes, if any.
    pub fn snapshot(&self, page_id: PageId) -> Option<Box<[u8; PAGE_SIZE]>> {
        self.pages.lock().get(&page_id).cloned()
    }

    /// Number of pages stored.
    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of page reads served.
    pub fn num_reads(&self) -> u64 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of page writes accepted.
    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }
}

impl PageStore for MemoryPageStore {
    fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        let pages = self.pages.lock();
        let page = pages
            .get(&page_id)
            .ok_or(PageKvError::PageNotFound(page_id))?;
        data.copy_from_slice(&page[..]);

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        let mut page = Box::new([0u8; PAGE_SIZE]);
        page.copy_from_slice(data);
        self.pages.lock().insert(page_id, page);

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn max_page_id(&self) -> Option<PageId> {
        self.pages.lock().keys().max().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_read_write() {
        let store = MemoryPageStore::new();
        assert!(store.is_empty());

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        data[PAGE_SIZE - 1] = 7;
        store.write_page(PageId::new(3), &data).unwrap();

        let mut read = [0u8; PAGE_SIZE];
        store.read_page(PageId::new(3), &mut read).unwrap();
        assert_eq!(read[0], 42);
        assert_eq!(read[PAGE_SIZE - 1], 7);

        assert_eq!(store.num_writes(), 1);
        assert_eq!(store.num_reads(), 1);
        assert_eq!(store.max_page_id(), Some(PageId::new(3)));
    }

    #[test]
    fn test_memory_store_missing_page() {
        let store = MemoryPageStore::new();
        let mut data = [0u8; PAGE_SIZE];
        assert!(matches!(
            store.read_page(PageId::new(1), &mut data),
            Err(PageKvError::PageNotFound(_))
        ));
        assert_eq!(store.max_page_id(), None);
    }

    #[test]
    fn test_memory_store_unwritten_id_below_max() {
        let store = MemoryPageStore::new();
        let mut data = [0u8; PAGE_SIZE];
        store.write_page(PageId::new(3), &data).unwrap();

        assert!(matches!(
            store.read_page(PageId::new(2), &mut data),
            Err(PageKvError::PageNotFound(_))
        ));
    }
}
