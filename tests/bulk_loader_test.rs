use std::io::Write;
use std::sync::Arc;

use pagekv::buffer::BufferPoolManager;
use pagekv::common::{TreeOptions, MAX_LEAF_ENTRIES};
use pagekv::index::{BPlusTree, BulkLoader};
use pagekv::storage::disk::DiskManager;
use pagekv::storage::MemoryPageStore;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::NamedTempFile;

fn create_loader(pool_size: usize, options: TreeOptions) -> BulkLoader {
    let store = Arc::new(MemoryPageStore::new());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, store).unwrap());
    BulkLoader::new(bpm, options).unwrap()
}

fn encode(records: &[(u64, u64)]) -> Vec<u8> {
    records
        .iter()
        .flat_map(|(key, value)| key.to_be_bytes().into_iter().chain(value.to_be_bytes()))
        .collect()
}

#[test]
fn test_bulk_load_sorts_records() {
    let loader = create_loader(8, TreeOptions::default());
    let raw = encode(&[(5, 50), (1, 10), (3, 30)]);

    let tree = loader.load_reader(&raw[..]).unwrap();
    let entries: Vec<_> = tree.iter().unwrap().map(|e| e.unwrap()).collect();
    assert_eq!(entries, vec![(1, 10), (3, 30), (5, 50)]);
}

#[test]
fn test_bulk_load_truncated_tail() {
    let loader = create_loader(8, TreeOptions::default());
    let mut raw = encode(&[(2, 20), (1, 10)]);
    raw.extend_from_slice(&7u64.to_be_bytes());

    let tree = loader.load_reader(&raw[..]).unwrap();
    assert_eq!(tree.verify().unwrap().entries, 2);
    assert!(tree.get(7).unwrap_err().is_not_found());
}

#[test]
fn test_bulk_load_packs_leaves() {
    let loader = create_loader(16, TreeOptions::default());
    let count = MAX_LEAF_ENTRIES as u64 * 10 + 1;
    let mut records: Vec<_> = (0..count).map(|k| (k, !k)).collect();
    records.shuffle(&mut StdRng::seed_from_u64(3));

    let tree = loader.build(records).unwrap();
    let stats = tree.verify().unwrap();

    assert_eq!(stats.entries, count as usize);
    assert_eq!(stats.leaf_pages, 11);
    assert_eq!(stats.internal_pages, 1);
    assert_eq!(stats.height, 2);
    assert_eq!(tree.get(count - 1).unwrap(), !(count - 1));
}

#[test]
fn test_bulk_load_deep_tree_then_insert() {
    let options = TreeOptions::default()
        .with_leaf_capacity(4)
        .with_internal_capacity(3);
    let loader = create_loader(32, options);
    let records: Vec<_> = (0..1000).map(|k| (k * 2, k)).collect();

    let mut tree = loader.build(records).unwrap();
    let stats = tree.verify().unwrap();
    assert_eq!(stats.leaf_pages, 250);
    assert!(stats.height >= 5);

    // Packed leaves are full, so odd keys force splits everywhere.
    for k in 0..200 {
        tree.insert(k * 2 + 1, 0).unwrap();
    }
    assert_eq!(tree.verify().unwrap().entries, 1200);

    let reversed: Vec<u64> = tree.iter_rev().unwrap().take(3).map(|e| e.unwrap().0).collect();
    assert_eq!(reversed, vec![1998, 1996, 1994]);
}

#[test]
fn test_bulk_load_file_and_reopen() {
    let mut input = NamedTempFile::new().unwrap();
    let records: Vec<_> = (0..5000u64).rev().map(|k| (k, k + 10)).collect();
    input.write_all(&encode(&records)).unwrap();
    input.flush().unwrap();

    let db = NamedTempFile::new().unwrap();
    let root_page_id = {
        let dm = Arc::new(DiskManager::new(db.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(8, dm).unwrap());
        let loader = BulkLoader::new(bpm.clone(), TreeOptions::default()).unwrap();

        let tree = loader.load_file(input.path()).unwrap();
        bpm.flush_all_pages().unwrap();
        tree.root_page_id()
    };

    let dm = Arc::new(DiskManager::new(db.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(8, dm).unwrap());
    let tree = BPlusTree::open(bpm, root_page_id, TreeOptions::default()).unwrap();

    assert_eq!(tree.get(4321).unwrap(), 4331);
    assert_eq!(tree.range_scan(0, 2).unwrap(), vec![(0, 10), (1, 11), (2, 12)]);
    assert_eq!(tree.verify().unwrap().entries, 5000);
}
