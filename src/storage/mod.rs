//! Backing page stores beneath the buffer pool.

pub mod disk;
mod page_store;

pub use page_store::*;
