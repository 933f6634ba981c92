use std::sync::Arc;

use tracing::{debug, warn};

use crate::buffer::{BufferPoolManager, WritePageGuard};
use crate::common::{
    DuplicatePolicy, PageId, PageKvError, Result, TreeOptions, INVALID_PAGE_ID,
};

use super::btree_iterator::{BPlusTreeIterator, ScanDirection};
use super::btree_page::{node_type, InternalNode, InternalPage, LeafNode, LeafPage, NodeType};

/// A write-latched ancestor kept on the insert path, with the child slot the
/// descent went through.
struct PathEntry {
    guard: WritePageGuard,
    child_index: usize,
}

/// Shape summary returned by [`BPlusTree::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    pub height: usize,
    pub leaf_pages: usize,
    pub internal_pages: usize,
    pub entries: usize,
}

/// B+Tree over fixed-width `u64` keys and values, stored in pages obtained
/// exclusively through a [`BufferPoolManager`].
///
/// Leaves form a doubly linked list for ordered scans in either direction.
/// Nodes are never merged or freed. The root id changes only when the root
/// splits; `insert` takes `&mut self`, so callers sharing a tree across
/// threads must serialize writers themselves (e.g. behind a lock).
pub struct BPlusTree {
    bpm: Arc<BufferPoolManager>,
    root_page_id: PageId,
    options: TreeOptions,
}

impl BPlusTree {
    /// Creates an empty tree whose root is a fresh leaf page.
    pub fn create(bpm: Arc<BufferPoolManager>, options: TreeOptions) -> Result<Self> {
        options.validate()?;

        let root_page_id = {
            let mut guard = bpm.new_page_write()?;
            LeafNode::new(guard.data_mut()).init();
            guard.page_id()
        };
        debug!(%root_page_id, "created tree");

        Ok(Self {
            bpm,
            root_page_id,
            options,
        })
    }

    /// Reattaches to a tree previously built on the same backing store.
    pub fn open(
        bpm: Arc<BufferPoolManager>,
        root_page_id: PageId,
        options: TreeOptions,
    ) -> Result<Self> {
        options.validate()?;
        {
            let guard = bpm.fetch_page_read(root_page_id)?;
            node_type(guard.data())?;
        }

        Ok(Self {
            bpm,
            root_page_id,
            options,
        })
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    /// Point lookup. Fails with `KeyNotFound` if the key was never inserted.
    pub fn get(&self, key: u64) -> Result<u64> {
        let leaf_page_id = self.find_leaf(key)?;

        let guard = self.bpm.fetch_page_read(leaf_page_id)?;
        LeafNode::open(guard.data())?
            .get(key)
            .ok_or(PageKvError::KeyNotFound(key))
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: u64) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(PageKvError::KeyNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Walks from the root to the leaf whose key range holds `key`.
    fn find_leaf(&self, key: u64) -> Result<PageId> {
        self.descend(|node| node.child_index_for(key))
    }

    /// Returns the first leaf of the chain.
    pub fn leftmost_leaf(&self) -> Result<PageId> {
        self.descend(|_| 0)
    }

    /// Returns the last leaf of the chain.
    pub fn rightmost_leaf(&self) -> Result<PageId> {
        self.descend(|node| node.key_count())
    }

    /// Number of levels, counting the leaf level.
    pub fn height(&self) -> Result<usize> {
        let mut height = 1;
        let mut current = self.root_page_id;

        loop {
            let guard = self.bpm.fetch_page_read(current)?;
            match node_type(guard.data())? {
                NodeType::Leaf => return Ok(height),
                NodeType::Internal => {
                    current = InternalNode::open(guard.data())?.child_at(0);
                    height += 1;
                }
            }
        }
    }

    fn descend<F>(&self, mut pick: F) -> Result<PageId>
    where
        F: FnMut(&InternalNode<&[u8]>) -> usize,
    {
        let mut current = self.root_page_id;

        loop {
            let guard = self.bpm.fetch_page_read(current)?;
            match node_type(guard.data())? {
                NodeType::Leaf => return Ok(current),
                NodeType::Internal => {
                    let node = InternalNode::open(guard.data())?;
                    let child = node.child_at(pick(&node));
                    if !child.is_valid() {
                        return Err(PageKvError::invariant(format!(
                            "internal page {} has a null child",
                            current
                        )));
                    }
                    current = child;
                }
            }
        }
    }

    /// Inserts a pair, splitting full nodes on the way back up.
    ///
    /// An existing key is overwritten in place (or rejected, per the tree's
    /// duplicate policy) without splitting. When a split is needed, every page
    /// the split cascade uses is reserved before any byte is modified. If the
    /// pool cannot supply them, the insert fails with `PoolExhausted` and
    /// leaves the tree exactly as it was.
    pub fn insert(&mut self, key: u64, value: u64) -> Result<()> {
        let mut path: Vec<PathEntry> = Vec::new();
        let mut current = self.root_page_id;

        let mut leaf_guard = loop {
            let guard = self.bpm.fetch_page_write(current)?;
            match node_type(guard.data())? {
                NodeType::Leaf => break guard,
                NodeType::Internal => {
                    let node = InternalNode::open(guard.data())?;
                    let child_index = node.child_index_for(key);
                    let child = node.child_at(child_index);
                    if node.key_count() < self.options.internal_capacity {
                        // This node absorbs any promotion; ancestors stay untouched.
                        path.clear();
                    }
                    path.push(PathEntry { guard, child_index });
                    current = child;
                }
            }
        };
        let leaf_page_id = leaf_guard.page_id();

        let (entry_count, search, old_next, old_prev) = {
            let leaf = LeafNode::open(leaf_guard.data())?;
            (
                leaf.entry_count(),
                leaf.search(key),
                leaf.next_leaf(),
                leaf.prev_leaf(),
            )
        };

        let insert_pos = match search {
            Ok(index) => {
                return match self.options.duplicate_policy {
                    DuplicatePolicy::Overwrite => {
                        LeafNode::new(leaf_guard.data_mut()).set_value_at(index, value);
                        Ok(())
                    }
                    DuplicatePolicy::Reject => Err(PageKvError::DuplicateKey(key)),
                };
            }
            Err(pos) => pos,
        };

        if entry_count < self.options.leaf_capacity {
            LeafNode::new(leaf_guard.data_mut()).insert_at(insert_pos, key, value);
            return Ok(());
        }

        // Only the first path entry can have room; all others split.
        let absorbed = path.first().is_some_and(|entry| {
            InternalNode::new(entry.guard.data()).key_count() < self.options.internal_capacity
        });
        let internal_splits = if absorbed { path.len() - 1 } else { path.len() };
        let pages_needed = 1 + internal_splits + usize::from(!absorbed);

        let mut next_guard = match old_next.to_option() {
            Some(next_page_id) => Some(self.bpm.fetch_page_write(next_page_id)?),
            None => None,
        };
        let mut reserved = self.reserve_pages(pages_needed)?.into_iter();

        // Nothing below can fail for lack of frames.
        let mut entries = LeafNode::new(leaf_guard.data()).entries();
        entries.insert(insert_pos, (key, value));
        let mid = entries.len() / 2;
        let separator = entries[mid].0;

        let mut right_guard = Self::take_reserved(&mut reserved)?;
        let right_page_id = right_guard.page_id();
        LeafPage {
            next: old_next,
            prev: leaf_page_id,
            entries: entries[mid..].to_vec(),
        }
        .encode_into(right_guard.data_mut())?;
        LeafPage {
            next: right_page_id,
            prev: old_prev,
            entries: entries[..mid].to_vec(),
        }
        .encode_into(leaf_guard.data_mut())?;
        if let Some(guard) = next_guard.as_mut() {
            LeafNode::new(guard.data_mut()).set_prev_leaf(right_page_id);
        }
        debug!(%leaf_page_id, %right_page_id, separator, "split leaf");
        drop(next_guard);
        drop(right_guard);
        drop(leaf_guard);

        let mut promoted = (separator, right_page_id);
        let mut split_page_id = leaf_page_id;

        while let Some(PathEntry {
            mut guard,
            child_index,
        }) = path.pop()
        {
            let node = InternalNode::open(guard.data())?;
            if node.key_count() < self.options.internal_capacity {
                InternalNode::new(guard.data_mut()).insert_at(child_index, promoted.0, promoted.1);
                return Ok(());
            }

            let mut keys = node.keys();
            let mut children = node.children();
            keys.insert(child_index, promoted.0);
            children.insert(child_index + 1, promoted.1);

            let mid = keys.len() / 2;
            let up_key = keys[mid];

            let mut right_guard = Self::take_reserved(&mut reserved)?;
            InternalPage {
                keys: keys[mid + 1..].to_vec(),
                children: children[mid + 1..].to_vec(),
            }
            .encode_into(right_guard.data_mut())?;
            InternalPage {
                keys: keys[..mid].to_vec(),
                children: children[..=mid].to_vec(),
            }
            .encode_into(guard.data_mut())?;

            split_page_id = guard.page_id();
            promoted = (up_key, right_guard.page_id());
            debug!(page_id = %split_page_id, right_page_id = %promoted.1, up_key, "split internal node");
        }

        // The old root split: grow the tree by one level.
        let mut root_guard = Self::take_reserved(&mut reserved)?;
        InternalPage {
            keys: vec![promoted.0],
            children: vec![split_page_id, promoted.1],
        }
        .encode_into(root_guard.data_mut())?;

        let old_root = self.root_page_id;
        self.root_page_id = root_guard.page_id();
        debug!(%old_root, new_root = %self.root_page_id, "root split");

        Ok(())
    }

    /// Allocates `count` pinned pages up front, or none at all.
    fn reserve_pages(&self, count: usize) -> Result<Vec<WritePageGuard>> {
        let mut pages = Vec::with_capacity(count);
        for _ in 0..count {
            match self.bpm.new_page_write() {
                Ok(guard) => pages.push(guard),
                Err(e) => {
                    if !pages.is_empty() {
                        warn!(
                            orphaned = pages.len(),
                            "split aborted, reserved pages left unused"
                        );
                    }
                    return Err(e);
                }
            }
        }
        Ok(pages)
    }

    fn take_reserved(
        reserved: &mut impl Iterator<Item = WritePageGuard>,
    ) -> Result<WritePageGuard> {
        reserved
            .next()
            .ok_or_else(|| PageKvError::invariant("split ran out of reserved pages"))
    }

    /// Ascending scan over every entry, following next-leaf links.
    pub fn iter(&self) -> Result<BPlusTreeIterator<'_>> {
        let start = self.leftmost_leaf()?;
        Ok(BPlusTreeIterator::new(
            &self.bpm,
            start,
            ScanDirection::Forward,
            0,
            u64::MAX,
        ))
    }

    /// Descending scan over every entry, following previous-leaf links.
    pub fn iter_rev(&self) -> Result<BPlusTreeIterator<'_>> {
        let start = self.rightmost_leaf()?;
        Ok(BPlusTreeIterator::new(
            &self.bpm,
            start,
            ScanDirection::Backward,
            0,
            u64::MAX,
        ))
    }

    /// Ascending scan over keys in `start..=end`.
    pub fn range(&self, start: u64, end: u64) -> Result<BPlusTreeIterator<'_>> {
        let leaf = self.find_leaf(start)?;
        Ok(BPlusTreeIterator::new(
            &self.bpm,
            leaf,
            ScanDirection::Forward,
            start,
            end,
        ))
    }

    /// Collects all entries with keys in `start..=end`, in ascending order.
    pub fn range_scan(&self, start: u64, end: u64) -> Result<Vec<(u64, u64)>> {
        if start > end {
            return Ok(Vec::new());
        }
        self.range(start, end)?.collect()
    }

    /// Checks the structural invariants of the whole tree.
    ///
    /// Per node: keys strictly ascending and inside the range the parent
    /// routes to it. Globally: all leaves at the same depth, and the leaf
    /// chain visits exactly the leaves of the tree, left to right, with
    /// consistent back links and strictly ascending keys.
    pub fn verify(&self) -> Result<TreeStats> {
        let mut stats = TreeStats::default();
        let mut leaves = Vec::new();
        stats.height =
            self.verify_node(self.root_page_id, None, None, 1, &mut stats, &mut leaves)?;

        let mut expected_prev = INVALID_PAGE_ID;
        let mut current = leaves.first().copied().unwrap_or(INVALID_PAGE_ID);
        let mut last_key: Option<u64> = None;
        let mut visited = 0;
        let mut chained_entries = 0;

        while let Some(page_id) = current.to_option() {
            if leaves.get(visited) != Some(&page_id) {
                return Err(PageKvError::invariant(format!(
                    "leaf chain reaches {} out of tree order",
                    page_id
                )));
            }

            let guard = self.bpm.fetch_page_read(page_id)?;
            let leaf = LeafNode::open(guard.data())?;
            if leaf.prev_leaf() != expected_prev {
                return Err(PageKvError::invariant(format!(
                    "leaf {} links back to {} instead of {}",
                    page_id,
                    leaf.prev_leaf(),
                    expected_prev
                )));
            }
            for (key, _) in leaf.entries() {
                if last_key.is_some_and(|last| key <= last) {
                    return Err(PageKvError::invariant(format!(
                        "leaf chain not strictly ascending at key {}",
                        key
                    )));
                }
                last_key = Some(key);
                chained_entries += 1;
            }

            visited += 1;
            expected_prev = page_id;
            current = leaf.next_leaf();
        }

        if visited != leaves.len() || chained_entries != stats.entries {
            return Err(PageKvError::invariant(format!(
                "leaf chain covers {} of {} leaves",
                visited,
                leaves.len()
            )));
        }

        Ok(stats)
    }

    /// Verifies the subtree at `page_id` against the half-open key range
    /// `[lower, upper)` and returns the depth of its leaves.
    fn verify_node(
        &self,
        page_id: PageId,
        lower: Option<u64>,
        upper: Option<u64>,
        depth: usize,
        stats: &mut TreeStats,
        leaves: &mut Vec<PageId>,
    ) -> Result<usize> {
        let in_range = |key: u64| lower.map_or(true, |l| key >= l) && upper.map_or(true, |u| key < u);
        let ascending = |keys: &[u64]| keys.windows(2).all(|w| w[0] < w[1]);

        let (keys, children) = {
            let guard = self.bpm.fetch_page_read(page_id)?;
            match node_type(guard.data())? {
                NodeType::Leaf => {
                    let keys: Vec<u64> = LeafNode::open(guard.data())?
                        .entries()
                        .into_iter()
                        .map(|(key, _)| key)
                        .collect();
                    (keys, None)
                }
                NodeType::Internal => {
                    let node = InternalNode::open(guard.data())?;
                    (node.keys(), Some(node.children()))
                }
            }
        };

        if !ascending(&keys) {
            return Err(PageKvError::invariant(format!(
                "keys of {} are not strictly ascending",
                page_id
            )));
        }
        if let Some(key) = keys.iter().copied().find(|&key| !in_range(key)) {
            return Err(PageKvError::invariant(format!(
                "key {} in {} lies outside its parent's range",
                key, page_id
            )));
        }

        let Some(children) = children else {
            stats.leaf_pages += 1;
            stats.entries += keys.len();
            leaves.push(page_id);
            return Ok(depth);
        };

        stats.internal_pages += 1;
        let mut leaf_depth = None;

        for (i, &child) in children.iter().enumerate() {
            let child_lower = if i == 0 { lower } else { Some(keys[i - 1]) };
            let child_upper = keys.get(i).copied().or(upper);
            let child_depth =
                self.verify_node(child, child_lower, child_upper, depth + 1, stats, leaves)?;

            match leaf_depth {
                None => leaf_depth = Some(child_depth),
                Some(d) if d != child_depth => {
                    return Err(PageKvError::invariant(format!(
                        "leaves under {} sit at depths {} and {}",
                        page_id, d, child_depth
                    )));
                }
                Some(_) => {}
            }
        }

        leaf_depth.ok_or_else(|| PageKvError::invariant(format!("{} has no children", page_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPageStore;

    fn create_tree(pool_size: usize, leaf_capacity: usize) -> BPlusTree {
        let store = Arc::new(MemoryPageStore::new());
        let bpm = Arc::new(BufferPoolManager::new(pool_size, store).unwrap());
        let options = TreeOptions::default()
            .with_leaf_capacity(leaf_capacity)
            .with_internal_capacity(3);
        BPlusTree::create(bpm, options).unwrap()
    }

    #[test]
    fn test_empty_tree() {
        let tree = create_tree(8, 3);
        assert!(matches!(tree.get(1), Err(PageKvError::KeyNotFound(1))));
        assert_eq!(tree.height().unwrap(), 1);
        assert_eq!(tree.iter().unwrap().count(), 0);

        let stats = tree.verify().unwrap();
        assert_eq!(stats.leaf_pages, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_root_split_after_fourth_insert() {
        let mut tree = create_tree(16, 3);
        let first_root = tree.root_page_id();

        for key in 1..=3 {
            tree.insert(key, key * 10).unwrap();
        }
        assert_eq!(tree.root_page_id(), first_root);
        assert_eq!(tree.height().unwrap(), 1);

        tree.insert(4, 40).unwrap();
        assert_ne!(tree.root_page_id(), first_root);
        assert_eq!(tree.height().unwrap(), 2);

        let guard = tree.buffer_pool().fetch_page_read(tree.root_page_id()).unwrap();
        let root = InternalPage::decode(guard.data()).unwrap();
        drop(guard);
        assert_eq!(root.keys, vec![3]);
        assert_eq!(root.children[0], first_root);

        for key in 1..=4 {
            assert_eq!(tree.get(key).unwrap(), key * 10);
        }
    }

    #[test]
    fn test_internal_split_grows_third_level() {
        let mut tree = create_tree(32, 3);
        for key in 1..=40 {
            tree.insert(key, key).unwrap();
        }

        let stats = tree.verify().unwrap();
        assert!(stats.height >= 3);
        assert_eq!(stats.entries, 40);
        for key in 1..=40 {
            assert_eq!(tree.get(key).unwrap(), key);
        }
    }

    #[test]
    fn test_leaf_chain_is_doubly_linked() {
        let mut tree = create_tree(32, 3);
        for key in (1..=30).rev() {
            tree.insert(key, key + 100).unwrap();
        }

        let forward: Vec<u64> = tree.iter().unwrap().map(|e| e.unwrap().0).collect();
        let backward: Vec<u64> = tree.iter_rev().unwrap().map(|e| e.unwrap().0).collect();

        assert_eq!(forward, (1..=30).collect::<Vec<_>>());
        assert_eq!(backward, (1..=30).rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_overwrite_does_not_split() {
        let mut tree = create_tree(16, 3);
        for key in 1..=3 {
            tree.insert(key, key).unwrap();
        }
        let root = tree.root_page_id();

        tree.insert(2, 200).unwrap();
        assert_eq!(tree.root_page_id(), root);
        assert_eq!(tree.get(2).unwrap(), 200);
    }

    #[test]
    fn test_reject_duplicates() {
        let store = Arc::new(MemoryPageStore::new());
        let bpm = Arc::new(BufferPoolManager::new(8, store).unwrap());
        let options = TreeOptions::default().with_duplicate_policy(DuplicatePolicy::Reject);
        let mut tree = BPlusTree::create(bpm, options).unwrap();

        tree.insert(5, 50).unwrap();
        assert!(matches!(tree.insert(5, 51), Err(PageKvError::DuplicateKey(5))));
        assert_eq!(tree.get(5).unwrap(), 50);
    }

    #[test]
    fn test_failed_split_leaves_tree_unchanged() {
        // Two frames: the pinned leaf plus one reserved page; the new root
        // cannot be reserved.
        let mut tree = create_tree(2, 3);
        for key in 1..=3 {
            tree.insert(key, key).unwrap();
        }
        let root = tree.root_page_id();

        assert!(matches!(
            tree.insert(4, 4),
            Err(PageKvError::PoolExhausted(2))
        ));
        assert_eq!(tree.root_page_id(), root);
        assert!(matches!(tree.get(4), Err(PageKvError::KeyNotFound(4))));
        for key in 1..=3 {
            assert_eq!(tree.get(key).unwrap(), key);
        }
        assert_eq!(tree.verify().unwrap().entries, 3);
    }

    #[test]
    fn test_scan_started_after_split_sees_new_entries() {
        let mut tree = create_tree(16, 3);
        for key in [10, 20, 30] {
            tree.insert(key, key).unwrap();
        }
        let before: Vec<u64> = tree.iter().unwrap().map(|e| e.unwrap().0).collect();

        tree.insert(15, 15).unwrap();
        let after: Vec<u64> = tree.iter().unwrap().map(|e| e.unwrap().0).collect();

        assert_eq!(before, vec![10, 20, 30]);
        assert_eq!(after, vec![10, 15, 20, 30]);
    }

    #[test]
    fn test_range_scan_bounds() {
        let mut tree = create_tree(32, 4);
        for key in 0..50 {
            tree.insert(key * 2, key).unwrap();
        }

        let hits = tree.range_scan(11, 20).unwrap();
        assert_eq!(hits, vec![(12, 6), (14, 7), (16, 8), (18, 9), (20, 10)]);
        assert!(tree.range_scan(20, 11).unwrap().is_empty());
        assert!(tree.range_scan(1000, 2000).unwrap().is_empty());
    }

    #[test]
    fn test_open_rejects_corrupted_root() {
        let store = Arc::new(MemoryPageStore::new());
        let bpm = Arc::new(BufferPoolManager::new(4, store).unwrap());

        let page_id = {
            let mut guard = bpm.new_page_write().unwrap();
            guard.data_mut()[7] = 0x7F;
            guard.page_id()
        };

        let err = BPlusTree::open(bpm, page_id, TreeOptions::default())
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }
}
