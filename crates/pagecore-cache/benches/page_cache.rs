#![forbid(unsafe_code)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pagecore_cache::{MemSwapDevice, PageCache};
use pagecore_types::{PageOffset, PAGE_SIZE};
use std::sync::Arc;

const IMAGE_PAGES: usize = 1024;

fn bench_hit_path(c: &mut Criterion) {
    let device = Arc::new(MemSwapDevice::new(IMAGE_PAGES * PAGE_SIZE));
    let cache = PageCache::new(device, 256).unwrap();
    for page in 0..256_u64 {
        cache.get(PageOffset(page * PAGE_SIZE as u64), false).unwrap();
    }

    c.bench_function("cache_hit_4k", |b| {
        let mut page = 0_u64;
        b.iter(|| {
            page = (page + 1) % 256;
            let read = cache
                .get(PageOffset(page * PAGE_SIZE as u64), false)
                .unwrap();
            black_box(read.as_slice()[0]);
        });
    });
}

fn bench_miss_evict_cycle(c: &mut Criterion) {
    let device = Arc::new(MemSwapDevice::new(IMAGE_PAGES * PAGE_SIZE));
    let cache = PageCache::new(device, 64).unwrap();

    c.bench_function("cache_miss_evict_4k", |b| {
        let mut page = 0_u64;
        b.iter(|| {
            // Stride past the capacity so every get misses and evicts.
            page = (page + 1) % IMAGE_PAGES as u64;
            let read = cache
                .get(PageOffset(page * PAGE_SIZE as u64), true)
                .unwrap();
            black_box(read.as_slice()[0]);
        });
    });
}

criterion_group!(benches, bench_hit_path, bench_miss_evict_cycle);
criterion_main!(benches);
