use std::fmt;

use super::config::PAGE_ID_SIZE;

/// Page identifier type - uniquely identifies a page in the backing store.
///
/// `PageId(0)` is reserved as the "none" sentinel used by leaf links and is
/// never handed out by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PageId(pub u64);

impl PageId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns false for the sentinel id.
    pub fn is_valid(&self) -> bool {
        *self != INVALID_PAGE_ID
    }

    /// Maps the sentinel to `None`.
    pub fn to_option(self) -> Option<PageId> {
        self.is_valid().then_some(self)
    }

    pub fn to_be_bytes(self) -> [u8; PAGE_ID_SIZE] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; PAGE_ID_SIZE]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl From<Option<PageId>> for PageId {
    fn from(page_id: Option<PageId>) -> Self {
        page_id.unwrap_or(INVALID_PAGE_ID)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

/// Frame identifier type - identifies a buffer frame in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl FrameId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameId({})", self.0)
    }
}

/// The "no page" sentinel.
pub const INVALID_PAGE_ID: PageId = PageId(0);

/// First identifier handed out by a fresh allocator.
pub const FIRST_PAGE_ID: PageId = PageId(1);
