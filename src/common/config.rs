use super::error::{PageKvError, Result};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 100;

/// Key width in bytes
pub const KEY_SIZE: usize = 8;

/// Value width in bytes
pub const VALUE_SIZE: usize = 8;

/// Serialized page identifier width in bytes
pub const PAGE_ID_SIZE: usize = 8;

/// Leaf header: node type, entry count, next leaf, previous leaf
pub const LEAF_HEADER_SIZE: usize = 32;

/// Internal header: node type, key count
pub const INTERNAL_HEADER_SIZE: usize = 16;

/// One leaf entry (key, value)
pub const LEAF_ENTRY_SIZE: usize = KEY_SIZE + VALUE_SIZE;

/// One internal (child, key) pair
pub const INTERNAL_ENTRY_SIZE: usize = PAGE_ID_SIZE + KEY_SIZE;

/// Maximum number of entries a leaf page can hold
pub const MAX_LEAF_ENTRIES: usize = (PAGE_SIZE - LEAF_HEADER_SIZE) / LEAF_ENTRY_SIZE;

/// Maximum number of separator keys an internal page can hold
pub const MAX_INTERNAL_KEYS: usize =
    (PAGE_SIZE - INTERNAL_HEADER_SIZE - PAGE_ID_SIZE) / INTERNAL_ENTRY_SIZE;

/// Bulk-load input record: 8-byte key followed by 8-byte value, big-endian
pub const RECORD_SIZE: usize = KEY_SIZE + VALUE_SIZE;

/// What a single-record insert does when the key is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Last write wins.
    #[default]
    Overwrite,
    /// Fail with `DuplicateKey` and leave the stored value untouched.
    Reject,
}

/// Per-tree tuning.
///
/// Capacities below the page maximum only limit how full a node may get; the
/// page layout is identical, so a tree built with small capacities is still
/// readable with the defaults (and vice versa for reads).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeOptions {
    /// Maximum entries per leaf before it splits.
    pub leaf_capacity: usize,
    /// Maximum separator keys per internal node before it splits.
    pub internal_capacity: usize,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            leaf_capacity: MAX_LEAF_ENTRIES,
            internal_capacity: MAX_INTERNAL_KEYS,
            duplicate_policy: DuplicatePolicy::Overwrite,
        }
    }
}

impl TreeOptions {
    pub fn with_leaf_capacity(mut self, leaf_capacity: usize) -> Self {
        self.leaf_capacity = leaf_capacity;
        self
    }

    pub fn with_internal_capacity(mut self, internal_capacity: usize) -> Self {
        self.internal_capacity = internal_capacity;
        self
    }

    pub fn with_duplicate_policy(mut self, duplicate_policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = duplicate_policy;
        self
    }

    /// Maximum fan-out of an internal node.
    pub fn max_internal_children(&self) -> usize {
        self.internal_capacity + 1
    }

    pub fn validate(&self) -> Result<()> {
        if !(2..=MAX_LEAF_ENTRIES).contains(&self.leaf_capacity) {
            return Err(PageKvError::InvalidConfig(format!(
                "leaf capacity {} outside 2..={}",
                self.leaf_capacity, MAX_LEAF_ENTRIES
            )));
        }
        if !(2..=MAX_INTERNAL_KEYS).contains(&self.internal_capacity) {
            return Err(PageKvError::InvalidConfig(format!(
                "internal capacity {} outside 2..={}",
                self.internal_capacity, MAX_INTERNAL_KEYS
            )));
        }
        Ok(())
    }
}
