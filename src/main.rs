use std::sync::Arc;

use tracing::info;

use pagekv::buffer::BufferPoolManager;
use pagekv::common::{TreeOptions, DEFAULT_BUFFER_POOL_SIZE};
use pagekv::index::BulkLoader;
use pagekv::storage::disk::{DiskManager, DiskScheduler};

const DEMO_RECORDS: u64 = 10_000;

fn main() -> pagekv::Result<()> {
    tracing_subscriber::fmt::init();

    let db_path = "pagekv-demo.db";
    let record_file = std::env::args().nth(1);

    let disk_manager = Arc::new(DiskManager::new(db_path)?);
    let store = Arc::new(DiskScheduler::new(disk_manager));
    let bpm = Arc::new(BufferPoolManager::new(DEFAULT_BUFFER_POOL_SIZE, store)?);
    let loader = BulkLoader::new(Arc::clone(&bpm), TreeOptions::default())?;

    let mut tree = match &record_file {
        Some(path) => loader.load_file(path)?,
        None => {
            // Odd keys only, so the inserts below land between existing entries.
            let records = (0..DEMO_RECORDS).map(|i| (i * 2 + 1, i)).collect();
            loader.build(records)?
        }
    };
    let stats = tree.verify()?;
    info!(
        entries = stats.entries,
        leaves = stats.leaf_pages,
        height = stats.height,
        "tree loaded"
    );

    for key in (0..200).step_by(2) {
        tree.insert(key, key * 100)?;
    }
    let value = tree.get(100)?;
    info!(value, "lookup key=100");

    let hits = tree.range_scan(10, 20)?;
    info!(?hits, "range 10..=20");

    let last = tree.iter_rev()?.next().transpose()?;
    info!(?last, "largest entry");

    let stats = tree.verify()?;
    info!(
        entries = stats.entries,
        height = stats.height,
        resident = bpm.resident_page_count(),
        "after inserts"
    );

    bpm.flush_all_pages()?;
    drop(tree);
    drop(loader);
    drop(bpm);

    std::fs::remove_file(db_path)?;
    Ok(())
}
