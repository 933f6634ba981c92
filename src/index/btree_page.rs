//! Binary layout of B+Tree pages.
//!
//! All integers are 8-byte big-endian.
//!
//! ```text
//! Leaf:     [0:8] type=0 | [8:16] count | [16:24] next | [24:32] prev | (key, value) * count
//! Internal: [0:8] type=1 | [8:16] k     | child0, key0, child1, ..., key(k-1), child(k)
//! ```
//!
//! A zero next/prev link means "no neighbour".

use bytes::{Buf, BufMut};

use crate::common::{
    PageId, PageKvError, Result, INTERNAL_ENTRY_SIZE, INTERNAL_HEADER_SIZE, KEY_SIZE,
    LEAF_ENTRY_SIZE, LEAF_HEADER_SIZE, MAX_INTERNAL_KEYS, MAX_LEAF_ENTRIES, PAGE_ID_SIZE,
    PAGE_SIZE,
};

const NODE_TYPE_OFFSET: usize = 0;
const COUNT_OFFSET: usize = 8;
const NEXT_LEAF_OFFSET: usize = 16;
const PREV_LEAF_OFFSET: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Leaf = 0,
    Internal = 1,
}

/// Reads the node-type tag of a page.
pub fn node_type(data: &[u8]) -> Result<NodeType> {
    match (&data[NODE_TYPE_OFFSET..]).get_u64() {
        0 => Ok(NodeType::Leaf),
        1 => Ok(NodeType::Internal),
        tag => Err(PageKvError::invariant(format!("corrupted node tag {}", tag))),
    }
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    (&data[offset..offset + 8]).get_u64()
}

fn write_u64(data: &mut [u8], offset: usize, value: u64) {
    (&mut data[offset..offset + 8]).put_u64(value);
}

fn leaf_entry_offset(index: usize) -> usize {
    LEAF_HEADER_SIZE + index * LEAF_ENTRY_SIZE
}

fn child_offset(index: usize) -> usize {
    INTERNAL_HEADER_SIZE + index * INTERNAL_ENTRY_SIZE
}

fn key_offset(index: usize) -> usize {
    child_offset(index) + PAGE_ID_SIZE
}

/// View over a leaf page.
pub struct LeafNode<B> {
    data: B,
}

impl<B: AsRef<[u8]>> LeafNode<B> {
    /// Wraps a page without checking its header.
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    /// Wraps a page, failing if it is not a well-formed leaf header.
    pub fn open(data: B) -> Result<Self> {
        let node = Self::new(data);
        if node_type(node.bytes())? != NodeType::Leaf {
            return Err(PageKvError::invariant("expected a leaf page"));
        }
        let count = read_u64(node.bytes(), COUNT_OFFSET);
        if count > MAX_LEAF_ENTRIES as u64 {
            return Err(PageKvError::invariant(format!(
                "leaf entry count {} exceeds page capacity",
                count
            )));
        }
        Ok(node)
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn entry_count(&self) -> usize {
        read_u64(self.bytes(), COUNT_OFFSET) as usize
    }

    pub fn next_leaf(&self) -> PageId {
        PageId::new(read_u64(self.bytes(), NEXT_LEAF_OFFSET))
    }

    pub fn prev_leaf(&self) -> PageId {
        PageId::new(read_u64(self.bytes(), PREV_LEAF_OFFSET))
    }

    pub fn key_at(&self, index: usize) -> u64 {
        read_u64(self.bytes(), leaf_entry_offset(index))
    }

    pub fn value_at(&self, index: usize) -> u64 {
        read_u64(self.bytes(), leaf_entry_offset(index) + KEY_SIZE)
    }

    pub fn entry_at(&self, index: usize) -> (u64, u64) {
        (self.key_at(index), self.value_at(index))
    }

    /// Binary search for `key`: `Ok(index)` on an exact match, otherwise
    /// `Err(index)` where the key would be inserted.
    pub fn search(&self, key: u64) -> std::result::Result<usize, usize> {
        let mut low = 0;
        let mut high = self.entry_count();

        while low < high {
            let mid = low + (high - low) / 2;
            let mid_key = self.key_at(mid);

            if key == mid_key {
                return Ok(mid);
            } else if key < mid_key {
                high = mid;
            } else {
                low = mid + 1;
            }
        }

        Err(low)
    }

    pub fn get(&self, key: u64) -> Option<u64> {
        self.search(key).ok().map(|index| self.value_at(index))
    }

    pub fn entries(&self) -> Vec<(u64, u64)> {
        (0..self.entry_count()).map(|i| self.entry_at(i)).collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> LeafNode<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    /// Formats the page as an empty, unlinked leaf.
    pub fn init(&mut self) {
        let data = self.bytes_mut();
        data.fill(0);
        write_u64(data, NODE_TYPE_OFFSET, NodeType::Leaf as u64);
    }

    fn set_entry_count(&mut self, count: usize) {
        write_u64(self.bytes_mut(), COUNT_OFFSET, count as u64);
    }

    pub fn set_next_leaf(&mut self, page_id: PageId) {
        write_u64(self.bytes_mut(), NEXT_LEAF_OFFSET, page_id.as_u64());
    }

    pub fn set_prev_leaf(&mut self, page_id: PageId) {
        write_u64(self.bytes_mut(), PREV_LEAF_OFFSET, page_id.as_u64());
    }

    pub fn set_value_at(&mut self, index: usize, value: u64) {
        write_u64(self.bytes_mut(), leaf_entry_offset(index) + KEY_SIZE, value);
    }

    /// Shifts entries `index..` right by one slot and writes the pair at `index`.
    pub fn insert_at(&mut self, index: usize, key: u64, value: u64) {
        let count = self.entry_count();
        debug_assert!(index <= count && count < MAX_LEAF_ENTRIES);

        let start = leaf_entry_offset(index);
        let end = leaf_entry_offset(count);
        let data = self.bytes_mut();
        data.copy_within(start..end, start + LEAF_ENTRY_SIZE);
        write_u64(data, start, key);
        write_u64(data, start + KEY_SIZE, value);

        self.set_entry_count(count + 1);
    }
}

/// View over an internal page.
pub struct InternalNode<B> {
    data: B,
}

impl<B: AsRef<[u8]>> InternalNode<B> {
    /// Wraps a page without checking its header.
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    /// Wraps a page, failing if it is not a well-formed internal header.
    pub fn open(data: B) -> Result<Self> {
        let node = Self::new(data);
        if node_type(node.bytes())? != NodeType::Internal {
            return Err(PageKvError::invariant("expected an internal page"));
        }
        let count = read_u64(node.bytes(), COUNT_OFFSET);
        if count > MAX_INTERNAL_KEYS as u64 {
            return Err(PageKvError::invariant(format!(
                "internal key count {} exceeds page capacity",
                count
            )));
        }
        Ok(node)
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn key_count(&self) -> usize {
        read_u64(self.bytes(), COUNT_OFFSET) as usize
    }

    pub fn key_at(&self, index: usize) -> u64 {
        read_u64(self.bytes(), key_offset(index))
    }

    pub fn child_at(&self, index: usize) -> PageId {
        PageId::new(read_u64(self.bytes(), child_offset(index)))
    }

    /// Index of the child whose key range holds `key`: the child left of the
    /// smallest separator greater than `key`, or the last child.
    pub fn child_index_for(&self, key: u64) -> usize {
        let mut low = 0;
        let mut high = self.key_count();

        while low < high {
            let mid = low + (high - low) / 2;
            if key < self.key_at(mid) {
                high = mid;
            } else {
                low = mid + 1;
            }
        }

        low
    }

    pub fn keys(&self) -> Vec<u64> {
        (0..self.key_count()).map(|i| self.key_at(i)).collect()
    }

    pub fn children(&self) -> Vec<PageId> {
        (0..=self.key_count()).map(|i| self.child_at(i)).collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> InternalNode<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    /// Inserts `key` at separator `index` with `right_child` directly after it.
    pub fn insert_at(&mut self, index: usize, key: u64, right_child: PageId) {
        let count = self.key_count();
        debug_assert!(index <= count && count < MAX_INTERNAL_KEYS);

        let start = key_offset(index);
        let end = child_offset(count) + PAGE_ID_SIZE;
        let data = self.bytes_mut();
        data.copy_within(start..end, start + INTERNAL_ENTRY_SIZE);
        write_u64(data, start, key);
        write_u64(data, start + KEY_SIZE, right_child.as_u64());

        write_u64(self.bytes_mut(), COUNT_OFFSET, (count + 1) as u64);
    }
}

/// Decoded leaf page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeafPage {
    pub next: PageId,
    pub prev: PageId,
    pub entries: Vec<(u64, u64)>,
}

impl LeafPage {
    pub fn encode_into(&self, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);
        if self.entries.len() > MAX_LEAF_ENTRIES {
            return Err(PageKvError::invariant(format!(
                "{} entries do not fit in a leaf page",
                self.entries.len()
            )));
        }

        data.fill(0);
        let mut buf = data;
        buf.put_u64(NodeType::Leaf as u64);
        buf.put_u64(self.entries.len() as u64);
        buf.put_u64(self.next.as_u64());
        buf.put_u64(self.prev.as_u64());
        for &(key, value) in &self.entries {
            buf.put_u64(key);
            buf.put_u64(value);
        }
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let node = LeafNode::open(data)?;
        Ok(Self {
            next: node.next_leaf(),
            prev: node.prev_leaf(),
            entries: node.entries(),
        })
    }
}

/// Decoded internal page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InternalPage {
    pub keys: Vec<u64>,
    pub children: Vec<PageId>,
}

impl InternalPage {
    pub fn encode_into(&self, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);
        if self.children.len() != self.keys.len() + 1 {
            return Err(PageKvError::invariant(format!(
                "internal page with {} keys needs {} children, got {}",
                self.keys.len(),
                self.keys.len() + 1,
                self.children.len()
            )));
        }
        if self.keys.len() > MAX_INTERNAL_KEYS {
            return Err(PageKvError::invariant(format!(
                "{} keys do not fit in an internal page",
                self.keys.len()
            )));
        }

        data.fill(0);
        let mut buf = data;
        buf.put_u64(NodeType::Internal as u64);
        buf.put_u64(self.keys.len() as u64);
        for (child, key) in self.children.iter().zip(&self.keys) {
            buf.put_u64(child.as_u64());
            buf.put_u64(*key);
        }
        if let Some(last) = self.children.last() {
            buf.put_u64(last.as_u64());
        }
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let node = InternalNode::open(data)?;
        Ok(Self {
            keys: node.keys(),
            children: node.children(),
        })
    }
}
