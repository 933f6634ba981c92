//! pagekv - a disk-oriented key/value engine in Rust
//!
//! Fixed-width `u64` keys and values live in a B+Tree whose nodes are 4 KiB
//! pages. Pages are cached in a bounded buffer pool and persisted to a
//! pluggable page store.
//!
//! # Architecture
//!
//! - **Storage** (`storage`): where pages live when they are not cached
//!   - `PageStore`: read/write a page by id
//!   - `MemoryPageStore`: in-memory map, the default for tests
//!   - `DiskManager`: single database file
//!   - `DiskScheduler`: runs another store's I/O on a background worker
//!
//! - **Buffer Pool** (`buffer`): the only way the index touches pages
//!   - `BufferPoolManager`: pins, unpins, allocates and flushes pages
//!   - `ClockReplacer`: second-chance victim selection
//!   - `ReadPageGuard`/`WritePageGuard`: RAII guards that unpin on drop
//!
//! - **Index** (`index`): the B+Tree
//!   - `BPlusTree`: point lookups, inserts with node splits, range scans
//!   - `BulkLoader`: builds a packed tree from a batch of records
//!   - `LeafNode`/`InternalNode`: big-endian page codec
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use pagekv::buffer::BufferPoolManager;
//! use pagekv::common::TreeOptions;
//! use pagekv::index::BPlusTree;
//! use pagekv::storage::MemoryPageStore;
//!
//! let store = Arc::new(MemoryPageStore::new());
//! let bpm = Arc::new(BufferPoolManager::new(16, store).unwrap());
//! let mut tree = BPlusTree::create(bpm, TreeOptions::default()).unwrap();
//!
//! tree.insert(42, 4200).unwrap();
//! assert_eq!(tree.get(42).unwrap(), 4200);
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

pub use common::{PageId, PageKvError, Result};
