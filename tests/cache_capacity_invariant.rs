// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod common;

use common::{key, BYTES_HELPER};
use rand::{Rng, SeedableRng};
use storage_kernel::{
    cache::{CacheHandle, LruCache, Priority},
    LruCacheConfig,
};
use test_log::test;

const CAPACITY: usize = 64 * 1_024;

fn random_priority(rng: &mut impl Rng) -> Priority {
    match rng.gen_range(0..3) {
        0 => Priority::High,
        1 => Priority::Low,
        _ => Priority::Bottom,
    }
}

#[test]
fn cache_usage_never_exceeds_capacity_when_unpinned() -> storage_kernel::Result<()> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);

    let cache = LruCache::new(
        LruCacheConfig::new(CAPACITY)
            .num_shard_bits(2)
            .high_pri_pool_ratio(0.3)
            .low_pri_pool_ratio(0.3),
    )?;

    for _ in 0..10_000 {
        let n = rng.gen_range(0..1_000);

        match rng.gen_range(0..10) {
            0..=5 => {
                let len = rng.gen_range(1..2_048);
                cache.insert(
                    key(n),
                    Box::new(vec![0; len]),
                    &BYTES_HELPER,
                    len,
                    random_priority(&mut rng),
                )?;
            }
            6..=8 => {
                let _ = cache.lookup(&key(n), None, None, Priority::Low);
            }
            _ => {
                cache.erase(&key(n));
            }
        }

        assert!(cache.usage() <= CAPACITY);
        assert_eq!(0, cache.pinned_usage());
    }

    Ok(())
}

#[test]
fn cache_strict_limit_holds_with_pins() -> storage_kernel::Result<()> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(13);

    let cache = LruCache::new(
        LruCacheConfig::new(CAPACITY)
            .num_shard_bits(0)
            .strict_capacity_limit(true),
    )?;

    let mut pinned: Vec<CacheHandle> = vec![];

    for _ in 0..5_000 {
        let n = rng.gen_range(0..500);
        let len = rng.gen_range(1..4_096);

        match cache.insert_with_handle(
            key(n),
            Box::new(vec![0; len]),
            &BYTES_HELPER,
            len,
            random_priority(&mut rng),
        ) {
            Ok((handle, _)) => {
                if rng.gen_bool(0.1) {
                    pinned.push(handle);
                }
            }
            Err(storage_kernel::Error::MemoryLimit) => {
                // Make room by unpinning
                pinned.clear();
            }
            Err(e) => return Err(e),
        }

        assert!(cache.usage() <= CAPACITY);
    }

    pinned.clear();
    assert_eq!(0, cache.pinned_usage());

    Ok(())
}
