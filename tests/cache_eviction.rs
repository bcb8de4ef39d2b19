// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod common;

use common::{key, single_shard, BYTES_HELPER};
use parking_lot::Mutex;
use std::{any::Any, sync::Arc};
use storage_kernel::{
    cache::{CacheItemHelper, CacheKey, EvictionCallback, LruCache, Priority},
    Error,
};
use test_log::test;

fn insert(cache: &LruCache, n: u64, len: usize) -> storage_kernel::Result<()> {
    cache.insert(
        key(n),
        Box::new(vec![n as u8; len]),
        &BYTES_HELPER,
        len,
        Priority::Low,
    )?;
    Ok(())
}

fn contains(cache: &LruCache, n: u64) -> bool {
    cache.lookup(&key(n), None, None, Priority::Low).is_some()
}

#[test]
fn cache_evicts_least_recently_used() -> storage_kernel::Result<()> {
    let cache = LruCache::new(single_shard(100).strict_capacity_limit(true))?;

    for n in 1..=5 {
        insert(&cache, n, 30)?;
        assert!(cache.usage() <= 100);
    }

    assert_eq!(3, cache.entry_count());
    assert_eq!(90, cache.usage());

    assert!(!contains(&cache, 1));
    assert!(!contains(&cache, 2));
    assert!(contains(&cache, 3));
    assert!(contains(&cache, 4));
    assert!(contains(&cache, 5));

    Ok(())
}

#[test]
fn cache_lookup_refreshes_recency() -> storage_kernel::Result<()> {
    let cache = LruCache::new(single_shard(100))?;

    insert(&cache, 1, 30)?;
    insert(&cache, 2, 30)?;
    insert(&cache, 3, 30)?;

    // 1 becomes the most recently used entry
    assert!(contains(&cache, 1));

    insert(&cache, 4, 30)?;

    assert!(contains(&cache, 1));
    assert!(!contains(&cache, 2));

    Ok(())
}

#[test]
fn cache_pinned_entries_are_not_evicted() -> storage_kernel::Result<()> {
    let cache = LruCache::new(single_shard(100).strict_capacity_limit(true))?;

    let (pinned, _) = cache.insert_with_handle(
        key(1),
        Box::new(vec![1; 60]),
        &BYTES_HELPER,
        60,
        Priority::Low,
    )?;

    insert(&cache, 2, 30)?;
    insert(&cache, 3, 30)?;

    assert!(contains(&cache, 1));
    assert_eq!(60, cache.pinned_usage());

    // Does not fit next to the pinned entry
    let result = cache.insert_with_handle(
        key(4),
        Box::new(vec![4; 50]),
        &BYTES_HELPER,
        50,
        Priority::Low,
    );
    assert!(matches!(result, Err(Error::MemoryLimit)));

    drop(pinned);
    assert_eq!(0, cache.pinned_usage());
    assert!(cache.usage() <= 100);

    Ok(())
}

#[test]
fn cache_eviction_callback() -> storage_kernel::Result<()> {
    let cache = LruCache::new(single_shard(100))?;

    let evicted = Arc::new(Mutex::new(vec![]));
    {
        let evicted = evicted.clone();
        let callback: EvictionCallback = Arc::new(
            move |key: &CacheKey, _: &(dyn Any + Send + Sync), _: &CacheItemHelper| {
                evicted.lock().push(*key);
            },
        );
        cache.set_eviction_callback(Some(callback))?;
    }

    for n in 1..=4 {
        insert(&cache, n, 30)?;
    }

    assert_eq!(vec![key(1)], *evicted.lock());

    // Erasing is not an eviction
    assert!(cache.erase(&key(2)));
    assert_eq!(1, evicted.lock().len());

    Ok(())
}

#[test]
fn cache_shrink_capacity() -> storage_kernel::Result<()> {
    let cache = LruCache::new(single_shard(300))?;

    for n in 1..=10 {
        insert(&cache, n, 30)?;
    }
    assert_eq!(300, cache.usage());

    cache.set_capacity(90);
    assert_eq!(90, cache.capacity());
    assert_eq!(90, cache.usage());
    assert!(contains(&cache, 10));
    assert!(!contains(&cache, 7));

    Ok(())
}
