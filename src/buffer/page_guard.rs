use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock};
use tracing::error;

use crate::common::{PageId, PAGE_SIZE};

use super::buffer_pool_manager::PoolInner;
use super::FrameHeader;

type PageBytes = Box<[u8; PAGE_SIZE]>;

/// Unpins the page when dropped; shared by both guard kinds.
struct PageGuardBase {
    page_id: PageId,
    pool: Arc<PoolInner>,
    is_dirty: bool,
}

impl PageGuardBase {
    fn release(&self) {
        if let Err(e) = self.pool.unpin_page(self.page_id, self.is_dirty) {
            error!(page_id = %self.page_id, error = %e, "failed to release page guard");
        }
    }
}

/// RAII guard for read-only access to a pinned page.
/// Holds the frame's shared byte lock and unpins the page when dropped.
pub struct ReadPageGuard {
    base: PageGuardBase,
    data_guard: Option<ArcRwLockReadGuard<RawRwLock, PageBytes>>,
}

impl ReadPageGuard {
    /// Wraps a page the caller has already pinned once on the guard's behalf.
    pub(crate) fn new(page_id: PageId, frame: &FrameHeader, pool: Arc<PoolInner>) -> Self {
        Self {
            base: PageGuardBase {
                page_id,
                pool,
                is_dirty: false,
            },
            data_guard: Some(frame.data.read_arc()),
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        match &self.data_guard {
            Some(guard) => &guard[..],
            None => &[],
        }
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Release the byte lock before the page becomes evictable.
        self.data_guard.take();
        self.base.release();
    }
}

/// RAII guard for read-write access to a pinned page.
/// Marks the page dirty on release if the bytes were borrowed mutably.
pub struct WritePageGuard {
    base: PageGuardBase,
    data_guard: Option<ArcRwLockWriteGuard<RawRwLock, PageBytes>>,
}

impl WritePageGuard {
    /// Wraps a page the caller has already pinned once on the guard's behalf.
    pub(crate) fn new(page_id: PageId, frame: &FrameHeader, pool: Arc<PoolInner>) -> Self {
        Self {
            base: PageGuardBase {
                page_id,
                pool,
                is_dirty: false,
            },
            data_guard: Some(frame.data.write_arc()),
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    /// Returns a reference to the page data.
    pub fn data(&self) -> &[u8] {
        match &self.data_guard {
            Some(guard) => &guard[..],
            None => &[],
        }
    }

    /// Returns a mutable reference to the page data and marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.base.is_dirty = true;
        match &mut self.data_guard {
            Some(guard) => &mut guard[..],
            None => &mut [],
        }
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.data_guard.take();
        self.base.release();
    }
}
