//! Integration tests for the disk manager and scheduler

use std::sync::Arc;
use std::thread;

use pagekv::common::{PageId, PageKvError, PAGE_SIZE};
use pagekv::storage::disk::{DiskManager, DiskScheduler};
use pagekv::storage::PageStore;
use tempfile::NamedTempFile;

#[test]
fn test_disk_manager_create_file() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    assert_eq!(dm.get_num_pages(), 0);
    assert_eq!(dm.max_page_id(), None);
    assert_eq!(dm.get_num_reads(), 0);
    assert_eq!(dm.get_num_writes(), 0);
}

#[test]
fn test_disk_manager_read_write() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    let mut data = [0u8; PAGE_SIZE];
    data[0] = 0xDE;
    data[PAGE_SIZE - 1] = 0xEF;
    dm.write_page(PageId::new(3), &data).unwrap();

    let mut buf = [0u8; PAGE_SIZE];
    dm.read_page(PageId::new(3), &mut buf).unwrap();
    assert_eq!(buf[0], 0xDE);
    assert_eq!(buf[PAGE_SIZE - 1], 0xEF);

    // The hole below page 3 reads back as zeroes.
    dm.read_page(PageId::new(1), &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));
    assert!(matches!(
        dm.read_page(PageId::new(4), &mut buf),
        Err(PageKvError::PageNotFound(_))
    ));

    assert_eq!(dm.get_num_pages(), 3);
    assert_eq!(dm.get_num_writes(), 1);
    assert_eq!(dm.get_num_reads(), 2);
}

#[test]
fn test_disk_manager_missing_pages() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();
    let mut buf = [0u8; PAGE_SIZE];

    assert!(matches!(
        dm.read_page(PageId::new(1), &mut buf),
        Err(PageKvError::PageNotFound(_))
    ));
    assert!(matches!(
        dm.read_page(PageId::new(0), &mut buf),
        Err(PageKvError::PageNotFound(_))
    ));
    assert!(dm.write_page(PageId::new(0), &buf).is_err());
}

#[test]
fn test_disk_manager_persistence() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    {
        let dm = DiskManager::new(&path).unwrap();
        for i in 1..=5u8 {
            let mut data = [0u8; PAGE_SIZE];
            data[0] = i;
            dm.write_page(PageId::new(i as u64), &data).unwrap();
        }
        dm.sync().unwrap();
    }

    let dm = DiskManager::new(&path).unwrap();
    assert_eq!(dm.get_num_pages(), 5);
    assert_eq!(dm.max_page_id(), Some(PageId::new(5)));

    for i in 1..=5u8 {
        let mut buf = [0u8; PAGE_SIZE];
        dm.read_page(PageId::new(i as u64), &mut buf).unwrap();
        assert_eq!(buf[0], i);
    }
}

#[test]
fn test_disk_scheduler_round_trip() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let scheduler = DiskScheduler::new(dm.clone());

    let mut data = [0u8; PAGE_SIZE];
    data[..5].copy_from_slice(b"hello");
    scheduler.write_page(PageId::new(1), &data).unwrap();
    scheduler.sync().unwrap();

    let mut buf = [0u8; PAGE_SIZE];
    scheduler.read_page(PageId::new(1), &mut buf).unwrap();
    assert_eq!(&buf[..5], b"hello");

    assert_eq!(scheduler.max_page_id(), Some(PageId::new(1)));
    assert_eq!(dm.get_num_writes(), 1);
    assert_eq!(dm.get_num_reads(), 1);
}

#[test]
fn test_disk_scheduler_concurrent_requests() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let scheduler = Arc::new(DiskScheduler::new(dm));

    let handles: Vec<_> = (1..=8u64)
        .map(|i| {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                let mut data = [0u8; PAGE_SIZE];
                data[0] = i as u8;
                scheduler.write_page(PageId::new(i), &data).unwrap();

                let mut buf = [0u8; PAGE_SIZE];
                scheduler.read_page(PageId::new(i), &mut buf).unwrap();
                assert_eq!(buf[0], i as u8);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(scheduler.max_page_id(), Some(PageId::new(8)));
}
