use crate::buffer::BufferPoolManager;
use crate::common::{PageId, Result};

use super::btree_page::LeafNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Backward,
}

/// Walks the leaf chain, yielding entries whose keys fall in `lower..=upper`.
///
/// Only one leaf is pinned at a time, and only while an entry is read from it.
/// The iterator borrows the tree it came from, so the tree cannot be modified
/// while a scan is in progress:
///
/// ```compile_fail
/// # use std::sync::Arc;
/// # use pagekv::buffer::BufferPoolManager;
/// # use pagekv::common::TreeOptions;
/// # use pagekv::index::BPlusTree;
/// # use pagekv::storage::MemoryPageStore;
/// let bpm = Arc::new(BufferPoolManager::new(8, Arc::new(MemoryPageStore::new())).unwrap());
/// let mut tree = BPlusTree::create(bpm, TreeOptions::default()).unwrap();
///
/// let mut iter = tree.iter().unwrap();
/// tree.insert(1, 1).unwrap();
/// iter.next();
/// ```
pub struct BPlusTreeIterator<'a> {
    bpm: &'a BufferPoolManager,
    current_page_id: Option<PageId>,
    /// Cursor inside the current leaf; `None` until the leaf is first read.
    position: Option<usize>,
    direction: ScanDirection,
    lower: u64,
    upper: u64,
    done: bool,
}

impl<'a> BPlusTreeIterator<'a> {
    pub fn new(
        bpm: &'a BufferPoolManager,
        start_page_id: PageId,
        direction: ScanDirection,
        lower: u64,
        upper: u64,
    ) -> Self {
        Self {
            bpm,
            current_page_id: start_page_id.to_option(),
            position: None,
            direction,
            lower,
            upper,
            done: lower > upper,
        }
    }

    pub fn direction(&self) -> ScanDirection {
        self.direction
    }

    pub fn next_entry(&mut self) -> Result<Option<(u64, u64)>> {
        if self.done {
            return Ok(None);
        }

        while let Some(page_id) = self.current_page_id {
            let guard = self.bpm.fetch_page_read(page_id)?;
            let leaf = LeafNode::open(guard.data())?;

            match self.direction {
                ScanDirection::Forward => {
                    let mut index = self.position.unwrap_or(0);
                    while index < leaf.entry_count() {
                        let (key, value) = leaf.entry_at(index);
                        index += 1;
                        if key < self.lower {
                            continue;
                        }
                        if key > self.upper {
                            self.done = true;
                            return Ok(None);
                        }
                        self.position = Some(index);
                        return Ok(Some((key, value)));
                    }
                    self.current_page_id = leaf.next_leaf().to_option();
                }
                ScanDirection::Backward => {
                    // Entries [0, remaining) of this leaf are still unvisited.
                    let mut remaining = self.position.unwrap_or(leaf.entry_count());
                    while remaining > 0 {
                        remaining -= 1;
                        let (key, value) = leaf.entry_at(remaining);
                        if key > self.upper {
                            continue;
                        }
                        if key < self.lower {
                            self.done = true;
                            return Ok(None);
                        }
                        self.position = Some(remaining);
                        return Ok(Some((key, value)));
                    }
                    self.current_page_id = leaf.prev_leaf().to_option();
                }
            }
            self.position = None;
        }

        self.done = true;
        Ok(None)
    }
}

impl Iterator for BPlusTreeIterator<'_> {
    type Item = Result<(u64, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
