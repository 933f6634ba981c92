use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{FrameId, PageId, PageKvError, Result, FIRST_PAGE_ID, PAGE_SIZE};
use crate::storage::PageStore;

use super::{ClockReplacer, FrameHeader, ReadPageGuard, WritePageGuard};

/// Everything a pin, unpin, eviction or allocation touches, kept under one lock.
struct PoolState {
    /// Page table: maps resident page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Frames that have never held a page
    free_list: VecDeque<FrameId>,
    /// Clock replacer for eviction decisions
    replacer: ClockReplacer,
    /// Next page id the allocator hands out
    next_page_id: PageId,
}

/// Shared pool internals; page guards keep a handle so they can unpin on drop.
pub(crate) struct PoolInner {
    /// The buffer pool frames
    frames: Vec<Arc<FrameHeader>>,
    /// Pool-wide lock
    state: Mutex<PoolState>,
    /// Backing page store
    store: Arc<dyn PageStore>,
}

/// BufferPoolManager owns a bounded set of page frames over a backing page
/// store. It maps page identifiers to frames, pins and unpins them, picks
/// eviction victims with the clock policy, and writes dirty victims back
/// before their frames are reused.
///
/// A single pool-wide mutex makes pin-count updates and victim selection
/// atomic with respect to each other. Running out of unpinned frames fails
/// immediately with `PoolExhausted`; nothing waits for a pin to be released.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    inner: Arc<PoolInner>,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager with `pool_size` frames over `store`.
    /// Page allocation resumes after the highest page the store already holds.
    pub fn new(pool_size: usize, store: Arc<dyn PageStore>) -> Result<Self> {
        if pool_size == 0 {
            return Err(PageKvError::InvalidConfig(
                "buffer pool needs at least one frame".into(),
            ));
        }

        let frames = (0..pool_size)
            .map(|i| Arc::new(FrameHeader::new(FrameId::new(i as u32))))
            .collect();
        let free_list = (0..pool_size).map(|i| FrameId::new(i as u32)).collect();
        let next_page_id = store
            .max_page_id()
            .map(|max| PageId::new(max.as_u64() + 1))
            .unwrap_or(FIRST_PAGE_ID);

        let state = PoolState {
            page_table: HashMap::new(),
            free_list,
            replacer: ClockReplacer::new(pool_size),
            next_page_id,
        };

        Ok(Self {
            pool_size,
            inner: Arc::new(PoolInner {
                frames,
                state: Mutex::new(state),
                store,
            }),
        })
    }

    /// Pins `page_id`, loading it from the backing store if it is not resident,
    /// and returns the frame holding its bytes.
    /// Every successful call must be balanced by `unpin_page`.
    pub fn pin_page(&self, page_id: PageId) -> Result<Arc<FrameHeader>> {
        let frame_id = self.inner.fetch_page(page_id)?;
        Ok(Arc::clone(&self.inner.frames[frame_id.as_usize()]))
    }

    /// Drops one pin on `page_id`; `is_dirty` is OR-ed into the frame's flag.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<()> {
        self.inner.unpin_page(page_id, is_dirty)
    }

    /// Allocates the next page id and gives it a zeroed frame, pinned once and dirty.
    pub fn new_page(&self) -> Result<(PageId, Arc<FrameHeader>)> {
        let (page_id, frame_id) = self.inner.allocate_page()?;
        Ok((page_id, Arc::clone(&self.inner.frames[frame_id.as_usize()])))
    }

    /// Pins `page_id` and returns a guard holding its shared byte lock.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame_id = self.inner.fetch_page(page_id)?;
        let frame = &self.inner.frames[frame_id.as_usize()];
        Ok(ReadPageGuard::new(page_id, frame, Arc::clone(&self.inner)))
    }

    /// Pins `page_id` and returns a guard holding its exclusive byte lock.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame_id = self.inner.fetch_page(page_id)?;
        let frame = &self.inner.frames[frame_id.as_usize()];
        Ok(WritePageGuard::new(page_id, frame, Arc::clone(&self.inner)))
    }

    /// Allocates a new page and returns it behind a write guard.
    pub fn new_page_write(&self) -> Result<WritePageGuard> {
        let (page_id, frame_id) = self.inner.allocate_page()?;
        let frame = &self.inner.frames[frame_id.as_usize()];
        Ok(WritePageGuard::new(page_id, frame, Arc::clone(&self.inner)))
    }

    /// Writes `page_id` back if it is resident and dirty.
    /// Returns whether a write happened.
    ///
    /// The page is pinned for the duration of the write, and the pool lock is
    /// released before the page bytes are read, so writers on other threads
    /// keep making progress. The calling thread must not itself hold a write
    /// guard on `page_id`.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let Some(frame_id) = self.inner.pin_for_flush(page_id) else {
            return Ok(false);
        };

        let flushed = self.inner.write_back(frame_id);
        self.inner.unpin_page(page_id, false)?;
        flushed
    }

    /// Flushes all resident dirty pages and syncs the store.
    ///
    /// Pages are flushed one at a time; a page evicted in the meantime was
    /// already written back by the eviction.
    pub fn flush_all_pages(&self) -> Result<()> {
        let page_ids: Vec<PageId> = {
            let state = self.inner.state.lock();
            state.page_table.keys().copied().collect()
        };

        for page_id in page_ids {
            self.flush_page(page_id)?;
        }

        self.inner.store.sync()
    }

    /// Returns the pin count for a resident page.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        self.inner.resident_frame(page_id).map(|f| f.pin_count())
    }

    /// Returns the dirty flag for a resident page.
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        self.inner.resident_frame(page_id).map(|f| f.is_dirty())
    }

    /// Returns true if the page currently occupies a frame.
    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.inner.state.lock().page_table.contains_key(&page_id)
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of frames that have never held a page.
    pub fn free_frame_count(&self) -> usize {
        self.inner.state.lock().free_list.len()
    }

    /// Returns the number of pages currently resident.
    pub fn resident_page_count(&self) -> usize {
        self.inner.state.lock().page_table.len()
    }

    /// Returns the id the next allocation will receive.
    pub fn next_page_id(&self) -> PageId {
        self.inner.state.lock().next_page_id
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.inner.store
    }
}

impl PoolInner {
    fn resident_frame(&self, page_id: PageId) -> Option<&Arc<FrameHeader>> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| &self.frames[frame_id.as_usize()])
    }

    /// Pins a page, reading it from the store on a miss, and returns its frame.
    fn fetch_page(&self, page_id: PageId) -> Result<FrameId> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            self.frames[frame_id.as_usize()].pin();
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            return Ok(frame_id);
        }

        if !page_id.is_valid() || page_id >= state.next_page_id {
            return Err(PageKvError::PageNotFound(page_id));
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &self.frames[frame_id.as_usize()];

        let mut data = [0u8; PAGE_SIZE];
        if let Err(e) = self.store.read_page(page_id, &mut data) {
            state.free_list.push_back(frame_id);
            return Err(e);
        }

        frame.copy_from(&data);
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        Ok(frame_id)
    }

    pub(crate) fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<()> {
        let mut state = self.state.lock();

        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(PageKvError::PageNotFound(page_id))?;
        let frame = &self.frames[frame_id.as_usize()];

        let remaining = frame.unpin().ok_or_else(|| {
            PageKvError::invariant(format!("pin count underflow on {}", page_id))
        })?;

        if is_dirty {
            frame.set_dirty(true);
        }
        if remaining == 0 {
            state.replacer.set_evictable(frame_id, true);
        }

        Ok(())
    }

    /// Draws the next page id for a fresh zeroed frame, pinned once and dirty.
    fn allocate_page(&self) -> Result<(PageId, FrameId)> {
        let mut state = self.state.lock();

        // Take the frame first so a failed allocation does not burn an id.
        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = state.next_page_id;
        state.next_page_id = PageId::new(page_id.as_u64() + 1);

        let frame = &self.frames[frame_id.as_usize()];
        frame.set_page_id(page_id);
        frame.set_dirty(true);
        frame.pin();

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        debug!(%page_id, %frame_id, "allocated page");
        Ok((page_id, frame_id))
    }

    /// Gets an empty frame, either from the free list or by evicting a page.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = state
            .replacer
            .evict()
            .ok_or(PageKvError::PoolExhausted(self.frames.len()))?;
        let frame = &self.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();
        let was_dirty = frame.is_dirty();

        if was_dirty {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            if let Err(e) = self.store.write_page(old_page_id, &data) {
                state.replacer.set_evictable(frame_id, true);
                return Err(e);
            }
        }

        debug!(%frame_id, page_id = %old_page_id, write_back = was_dirty, "evicted page");

        state.page_table.remove(&old_page_id);
        frame.reset();

        Ok(frame_id)
    }

    /// Pins a resident page without counting it as an access.
    fn pin_for_flush(&self, page_id: PageId) -> Option<FrameId> {
        let mut state = self.state.lock();

        let frame_id = *state.page_table.get(&page_id)?;
        self.frames[frame_id.as_usize()].pin();
        state.replacer.set_evictable(frame_id, false);

        Some(frame_id)
    }

    /// Writes a pinned frame back if dirty. Called without the state lock.
    ///
    /// The dirty bit is cleared before the bytes are copied: a writer that
    /// changes the page after the copy sets it again on unpin.
    fn write_back(&self, frame_id: FrameId) -> Result<bool> {
        let frame = &self.frames[frame_id.as_usize()];
        if !frame.is_dirty() {
            return Ok(false);
        }
        frame.set_dirty(false);

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        if let Err(e) = self.store.write_page(frame.page_id(), &data) {
            frame.set_dirty(true);
            return Err(e);
        }

        Ok(true)
    }
}
