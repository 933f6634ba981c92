use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use bytes::Buf;
use tracing::{debug, info};

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{
    DuplicatePolicy, PageId, PageKvError, Result, TreeOptions, INVALID_PAGE_ID, RECORD_SIZE,
};

use super::btree_index::BPlusTree;
use super::btree_page::{InternalPage, LeafNode, LeafPage};

/// Builds a packed tree bottom-up from a batch of records instead of
/// inserting them one at a time.
pub struct BulkLoader {
    bpm: Arc<BufferPoolManager>,
    options: TreeOptions,
}

impl BulkLoader {
    pub fn new(bpm: Arc<BufferPoolManager>, options: TreeOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { bpm, options })
    }

    /// Parses a stream of 16-byte records: big-endian key, then big-endian value.
    /// Trailing bytes that do not form a whole record are ignored.
    pub fn read_records<R: Read>(mut reader: R) -> Result<Vec<(u64, u64)>> {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;

        let mut buf = &raw[..];
        let mut records = Vec::with_capacity(raw.len() / RECORD_SIZE);
        while buf.remaining() >= RECORD_SIZE {
            let key = buf.get_u64();
            let value = buf.get_u64();
            records.push((key, value));
        }
        if buf.has_remaining() {
            debug!(dropped_bytes = buf.remaining(), "ignored truncated trailing record");
        }

        Ok(records)
    }

    pub fn load_reader<R: Read>(&self, reader: R) -> Result<BPlusTree> {
        self.build(Self::read_records(reader)?)
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<BPlusTree> {
        let file = File::open(path.as_ref())?;
        self.load_reader(BufReader::new(file))
    }

    /// Sorts `records`, packs them into leaves, then stacks internal levels on
    /// top until a single root remains.
    pub fn build(&self, mut records: Vec<(u64, u64)>) -> Result<BPlusTree> {
        let input_len = records.len();
        records.sort_by_key(|&(key, _)| key);
        let records = self.dedup(records)?;

        let mut level = self.build_leaves(&records)?;
        let leaf_count = level.len();
        let mut height = 1;

        while level.len() > 1 {
            level = self.build_internal_level(&level)?;
            height += 1;
        }

        let root_page_id = level[0].1;
        info!(
            records = input_len,
            entries = records.len(),
            leaves = leaf_count,
            height,
            %root_page_id,
            "bulk load complete"
        );

        BPlusTree::open(Arc::clone(&self.bpm), root_page_id, self.options)
    }

    /// Collapses runs of equal keys in sorted input. The sort is stable, so the
    /// last record of a run is the last one in source order.
    fn dedup(&self, sorted: Vec<(u64, u64)>) -> Result<Vec<(u64, u64)>> {
        let mut out: Vec<(u64, u64)> = Vec::with_capacity(sorted.len());
        for (key, value) in sorted {
            match out.last_mut() {
                Some(last) if last.0 == key => match self.options.duplicate_policy {
                    DuplicatePolicy::Overwrite => last.1 = value,
                    DuplicatePolicy::Reject => return Err(PageKvError::DuplicateKey(key)),
                },
                _ => out.push((key, value)),
            }
        }
        Ok(out)
    }

    /// Writes the leaf level and returns `(min key, page id)` per leaf.
    fn build_leaves(&self, records: &[(u64, u64)]) -> Result<Vec<(u64, PageId)>> {
        if records.is_empty() {
            let mut guard = self.bpm.new_page_write()?;
            LeafNode::new(guard.data_mut()).init();
            return Ok(vec![(0, guard.page_id())]);
        }

        let mut level = Vec::with_capacity(records.len().div_ceil(self.options.leaf_capacity));
        let mut prev: Option<WritePageGuard> = None;

        for chunk in records.chunks(self.options.leaf_capacity) {
            let mut guard = self.bpm.new_page_write()?;
            let page_id = guard.page_id();

            LeafPage {
                next: INVALID_PAGE_ID,
                prev: prev.as_ref().map_or(INVALID_PAGE_ID, |g| g.page_id()),
                entries: chunk.to_vec(),
            }
            .encode_into(guard.data_mut())?;

            if let Some(mut prev_guard) = prev.take() {
                LeafNode::new(prev_guard.data_mut()).set_next_leaf(page_id);
            }

            level.push((chunk[0].0, page_id));
            prev = Some(guard);
        }

        Ok(level)
    }

    /// Groups the level below under new internal nodes.
    fn build_internal_level(&self, below: &[(u64, PageId)]) -> Result<Vec<(u64, PageId)>> {
        let mut level = Vec::new();
        let mut start = 0;

        for size in group_sizes(below.len(), self.options.max_internal_children()) {
            let group = &below[start..start + size];
            start += size;

            let mut guard = self.bpm.new_page_write()?;
            InternalPage {
                keys: group[1..].iter().map(|&(min_key, _)| min_key).collect(),
                children: group.iter().map(|&(_, page_id)| page_id).collect(),
            }
            .encode_into(guard.data_mut())?;

            level.push((group[0].0, guard.page_id()));
        }

        Ok(level)
    }
}

/// Splits `count` children into groups of at most `max_children`, never
/// leaving a lone child in the last group.
fn group_sizes(count: usize, max_children: usize) -> Vec<usize> {
    let mut sizes = vec![max_children; count / max_children];
    match count % max_children {
        0 => {}
        1 if !sizes.is_empty() => {
            if let Some(last) = sizes.last_mut() {
                *last -= 1;
            }
            sizes.push(2);
        }
        rem => sizes.push(rem),
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPageStore;

    fn create_loader(pool_size: usize, options: TreeOptions) -> BulkLoader {
        let store = Arc::new(MemoryPageStore::new());
        let bpm = Arc::new(BufferPoolManager::new(pool_size, store).unwrap());
        BulkLoader::new(bpm, options).unwrap()
    }

    fn encode(records: &[(u64, u64)]) -> Vec<u8> {
        let mut raw = Vec::new();
        for (key, value) in records {
            raw.extend_from_slice(&key.to_be_bytes());
            raw.extend_from_slice(&value.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_group_sizes() {
        assert_eq!(group_sizes(4, 4), vec![4]);
        assert_eq!(group_sizes(3, 4), vec![3]);
        assert_eq!(group_sizes(5, 4), vec![3, 2]);
        assert_eq!(group_sizes(9, 4), vec![4, 3, 2]);
        assert_eq!(group_sizes(10, 4), vec![4, 4, 2]);
    }

    #[test]
    fn test_read_records_drops_partial_tail() {
        let mut raw = encode(&[(1, 10), (2, 20)]);
        raw.extend_from_slice(&[0xAB; 9]);

        let records = BulkLoader::read_records(&raw[..]).unwrap();
        assert_eq!(records, vec![(1, 10), (2, 20)]);
    }

    #[test]
    fn test_build_unsorted_input() {
        let loader = create_loader(8, TreeOptions::default());
        let tree = loader.build(vec![(5, 50), (1, 10), (3, 30)]).unwrap();

        let entries: Vec<_> = tree.iter().unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(entries, vec![(1, 10), (3, 30), (5, 50)]);
    }

    #[test]
    fn test_build_empty_input() {
        let loader = create_loader(4, TreeOptions::default());
        let tree = loader.build(Vec::new()).unwrap();

        assert_eq!(tree.height().unwrap(), 1);
        assert_eq!(tree.verify().unwrap().entries, 0);
    }

    #[test]
    fn test_duplicates_last_in_source_order_wins() {
        let loader = create_loader(8, TreeOptions::default());
        let tree = loader.build(vec![(7, 1), (2, 2), (7, 3), (7, 4)]).unwrap();

        assert_eq!(tree.get(7).unwrap(), 4);
        assert_eq!(tree.verify().unwrap().entries, 2);
    }

    #[test]
    fn test_duplicates_rejected() {
        let options = TreeOptions::default().with_duplicate_policy(DuplicatePolicy::Reject);
        let loader = create_loader(8, options);

        assert!(matches!(
            loader.build(vec![(1, 1), (1, 2)]),
            Err(PageKvError::DuplicateKey(1))
        ));
    }

    #[test]
    fn test_lone_trailing_child_is_rebalanced() {
        // 13 leaves of 3 with fan-out 4 would leave a single-child group.
        let options = TreeOptions::default()
            .with_leaf_capacity(3)
            .with_internal_capacity(3);
        let loader = create_loader(16, options);
        let records: Vec<_> = (0..39).map(|k| (k, k * 2)).collect();

        let tree = loader.build(records).unwrap();
        let stats = tree.verify().unwrap();
        assert_eq!(stats.leaf_pages, 13);
        assert_eq!(stats.entries, 39);
        assert_eq!(tree.get(38).unwrap(), 76);
    }
}
