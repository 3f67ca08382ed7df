#![forbid(unsafe_code)]
//! File-backed cache scenarios: warm-up, dirty write-back, partial reads.

use pagecore_cache::{FileSwapDevice, PageCache};
use pagecore_types::{PageOffset, PAGE_SIZE};
use std::path::Path;
use std::sync::Arc;

fn off(page: u64) -> PageOffset {
    PageOffset(page * PAGE_SIZE as u64)
}

fn image_with(path: &Path, bytes: Vec<u8>) -> Arc<FileSwapDevice> {
    std::fs::write(path, bytes).unwrap();
    Arc::new(FileSwapDevice::open(path).unwrap())
}

#[test]
fn fresh_cache_warm_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("swap.img");
    let device = image_with(&path, vec![0_u8; 8 * PAGE_SIZE]);
    let cache = PageCache::new(device, 4).unwrap();

    for page in 0..4_u64 {
        let read = cache.get(off(page), false).unwrap();
        assert_eq!(read.as_slice().len(), PAGE_SIZE);
    }
    assert_eq!(cache.len(), 4);
    assert_eq!(cache.metrics().evictions, 0);

    cache.get(off(4), false).unwrap();
    assert_eq!(cache.len(), 4);
    assert_eq!(cache.metrics().evictions, 1);
    // Page 0 went out; the second-oldest survivor is now the tail.
    assert_eq!(cache.lru_tail(), Some(off(1)));

    for page in 5..8_u64 {
        cache.get(off(page), false).unwrap();
    }
    assert_eq!(cache.len(), 4);
    let metrics = cache.metrics();
    assert_eq!(metrics.misses, 8);
    assert_eq!(metrics.hits, 0);
    // Clean pages never write back.
    assert_eq!(metrics.writebacks, 0);
    cache.assert_invariants();
}

#[test]
fn dirty_pages_write_back_on_evict_and_teardown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("swap.img");
    let mut bytes = vec![0_u8; 8 * PAGE_SIZE];
    for page in 0..8_usize {
        bytes[page * PAGE_SIZE..(page + 1) * PAGE_SIZE].fill(page as u8 + 1);
    }
    let device = image_with(&path, bytes);
    let cache = PageCache::new(device, 4).unwrap();

    // Load the first half with write intent; each page is now dirty with
    // its marker pattern in cache.
    for page in 0..4_u64 {
        let mut read = cache.get(off(page), true).unwrap();
        read.as_mut_slice()[0] ^= 0xFF;
    }

    // Clobber the image underneath the cache.
    std::fs::write(&path, vec![0_u8; 8 * PAGE_SIZE]).unwrap();

    // The second half misses, loading zeros and evicting pages 0..4, whose
    // write-backs restore the markers.
    for page in 4..8_u64 {
        let mut read = cache.get(off(page), true).unwrap();
        read.as_mut_slice()[0] ^= 0xFF;
    }
    let metrics = cache.metrics();
    assert_eq!(metrics.evictions, 4);
    assert_eq!(metrics.writebacks, 4);

    // Distinguish the teardown write-backs of the second half.
    {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(4 * PAGE_SIZE as u64)).unwrap();
        file.write_all(&vec![0xEE_u8; 4 * PAGE_SIZE]).unwrap();
    }

    assert_eq!(cache.flush_and_clear(), 4);
    assert_eq!(cache.len(), 0);

    let contents = std::fs::read(&path).unwrap();
    for page in 0..4_usize {
        assert!(
            contents[page * PAGE_SIZE..(page + 1) * PAGE_SIZE]
                .iter()
                .all(|b| *b == page as u8 + 1),
            "page {page} lost its eviction write-back"
        );
    }
    for page in 4..8_usize {
        assert!(
            contents[page * PAGE_SIZE..(page + 1) * PAGE_SIZE]
                .iter()
                .all(|b| *b == 0),
            "page {page} lost its teardown write-back"
        );
    }
}

#[test]
fn truncated_image_zero_fills_the_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("swap.img");
    let device = image_with(&path, vec![0xCC_u8; 5000]);
    let cache = PageCache::new(device, 4).unwrap();

    let read = cache.get(off(1), false).unwrap();
    assert!(read.as_slice()[..904].iter().all(|b| *b == 0xCC));
    assert!(read.as_slice()[904..].iter().all(|b| *b == 0));
    assert_eq!(cache.metrics().partial_reads, 1);
}

#[test]
fn zero_length_image_serves_zero_pages() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("swap.img");
    let device = image_with(&path, Vec::new());
    let cache = PageCache::new(device, 4).unwrap();

    let read = cache.get(off(0), false).unwrap();
    assert!(read.as_slice().iter().all(|b| *b == 0));
    assert_eq!(cache.len(), 1);
}
