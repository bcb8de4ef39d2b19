// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod common;

use common::{key, single_shard, BYTES_HELPER};
use std::sync::Arc;
use storage_kernel::{
    cache::{AsyncLookupHandle, CacheTier, CompressedSecondaryCache, LruCache, Priority},
    CompressedSecondaryCacheConfig, Statistics, Ticker,
};
use test_log::test;

fn cache_with_secondary(stats: &Arc<Statistics>) -> storage_kernel::Result<LruCache> {
    let secondary = Arc::new(CompressedSecondaryCache::new(
        CompressedSecondaryCacheConfig::new(10_000),
    ));

    LruCache::new(
        single_shard(1_000)
            .secondary_cache(secondary)
            .statistics(stats.clone()),
    )
}

#[test]
fn cache_secondary_hit_is_promoted_on_second_lookup() -> storage_kernel::Result<()> {
    let stats = Statistics::new();
    let cache = cache_with_secondary(&stats)?;

    cache.insert_saved(
        key(1),
        b"saved block",
        &BYTES_HELPER,
        None,
        Priority::Low,
        CacheTier::NonVolatile,
    )?;
    assert_eq!(0, cache.entry_count());

    // First hit only leaves a placeholder behind
    let handle = cache
        .lookup(&key(1), Some(&BYTES_HELPER), None, Priority::Low)
        .expect("should hit secondary cache");
    assert!(handle.is_standalone());
    assert_eq!(Some(&b"saved block".to_vec()), handle.downcast::<Vec<u8>>());
    drop(handle);

    // Second hit promotes for real
    let handle = cache
        .lookup(&key(1), Some(&BYTES_HELPER), None, Priority::Low)
        .expect("should hit secondary cache");
    assert!(!handle.is_standalone());
    drop(handle);

    let handle = cache
        .lookup(&key(1), None, None, Priority::Low)
        .expect("should be resident");
    assert_eq!(Some(&b"saved block".to_vec()), handle.downcast::<Vec<u8>>());

    assert_eq!(2, stats.ticker(Ticker::SecondaryCacheHits));

    Ok(())
}

#[test]
fn cache_secondary_lookup_needs_helper() -> storage_kernel::Result<()> {
    let stats = Statistics::new();
    let cache = cache_with_secondary(&stats)?;

    cache.insert_saved(
        key(1),
        b"saved block",
        &BYTES_HELPER,
        None,
        Priority::Low,
        CacheTier::NonVolatile,
    )?;

    assert!(cache.lookup(&key(1), None, None, Priority::Low).is_none());
    assert_eq!(0, stats.ticker(Ticker::SecondaryCacheHits));

    Ok(())
}

#[test]
fn cache_volatile_tier_skips_secondary() -> storage_kernel::Result<()> {
    let stats = Statistics::new();
    let cache = cache_with_secondary(&stats)?;

    cache.insert_saved(
        key(1),
        b"saved block",
        &BYTES_HELPER,
        None,
        Priority::Low,
        CacheTier::Volatile,
    )?;
    assert_eq!(1, cache.entry_count());

    let handle = cache
        .lookup(&key(1), None, None, Priority::Low)
        .expect("should be resident");
    assert!(!handle.is_standalone());

    Ok(())
}

#[test]
fn cache_async_lookups() -> storage_kernel::Result<()> {
    let stats = Statistics::new();
    let cache = cache_with_secondary(&stats)?;

    cache.insert(
        key(1),
        Box::new(b"primary".to_vec()),
        &BYTES_HELPER,
        7,
        Priority::Low,
    )?;
    cache.insert_saved(
        key(2),
        b"secondary",
        &BYTES_HELPER,
        None,
        Priority::Low,
        CacheTier::NonVolatile,
    )?;

    let mut handles = [1, 2, 3].map(|n| {
        AsyncLookupHandle::new(key(n), Some(&BYTES_HELPER), None, Priority::Low)
    });

    for handle in &mut handles {
        cache.start_async_lookup(handle);
    }
    cache.wait_all(&mut handles);

    let [first, second, third] = &mut handles;

    assert!(first.is_ready());
    assert_eq!(
        Some(b"primary".to_vec()),
        first.result().and_then(|h| h.downcast::<Vec<u8>>().cloned())
    );
    assert_eq!(
        Some(b"secondary".to_vec()),
        second.result().and_then(|h| h.downcast::<Vec<u8>>().cloned())
    );
    assert!(third.result().is_none());

    Ok(())
}
