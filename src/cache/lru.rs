// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    handle::{AsyncLookupHandle, CacheHandle, Entry},
    helper::{CacheItemHelper, CreateContext, ObjectPtr},
    secondary::{SecondaryCache, SecondaryCacheResultHandle},
    shard::{Lookup, LruCacheShard},
    CacheKey, CacheTier, InsertOutcome, Priority,
};
use crate::{
    statistics::{record_tick, Ticker},
    LruCacheConfig, Statistics,
};
use parking_lot::RwLock;
use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

/// Called once for every entry the cache evicts
///
/// Receives the key, the object and its helper. Runs outside of any shard lock.
pub type EvictionCallback =
    Arc<dyn Fn(&CacheKey, &(dyn Any + Send + Sync), &CacheItemHelper) + Send + Sync>;

#[allow(clippy::module_name_repetitions)]
pub struct LruCacheInner {
    shards: Box<[LruCacheShard]>,
    shard_mask: u64,

    capacity: AtomicUsize,
    strict_capacity_limit: AtomicBool,

    secondary: Option<Arc<dyn SecondaryCache>>,
    eviction_callback: RwLock<Option<EvictionCallback>>,
    stats: Option<Arc<Statistics>>,
}

impl LruCacheInner {
    fn shard(&self, hash: u64) -> &LruCacheShard {
        #[allow(clippy::cast_possible_truncation)]
        let idx = (hash & self.shard_mask) as usize;

        // NOTE: shard count is 2^bits and the mask is count - 1
        #[allow(clippy::indexing_slicing)]
        &self.shards[idx]
    }

    fn per_shard_capacity(&self, capacity: usize) -> usize {
        capacity.div_ceil(self.shards.len())
    }

    fn insert_entry(&self, entry: &Arc<Entry>, with_handle: bool) -> crate::Result<InsertOutcome> {
        let mut evicted = vec![];
        let result = self.shard(entry.hash).insert(entry, with_handle, &mut evicted);
        self.notify_evicted(evicted);

        match &result {
            Ok(InsertOutcome::Resident | InsertOutcome::ExceedsCapacity) => {
                record_tick(self.stats.as_ref(), Ticker::BlockCacheAdd, 1);
                record_tick(
                    self.stats.as_ref(),
                    Ticker::BlockCacheBytesWrite,
                    entry.charge as u64,
                );
            }
            Ok(InsertOutcome::EvictedImmediately) | Err(_) => {
                record_tick(self.stats.as_ref(), Ticker::BlockCacheAddFailures, 1);
            }
        }

        result
    }

    /// Runs the eviction callback and spills to the secondary cache.
    ///
    /// Must be called without holding a shard lock.
    fn notify_evicted(&self, evicted: Vec<Arc<Entry>>) {
        if evicted.is_empty() {
            return;
        }

        let callback = self.eviction_callback.read().clone();

        for entry in evicted {
            if entry.dummy {
                continue;
            }

            if let Some(callback) = &callback {
                callback(&entry.key, &*entry.value, entry.helper);
            }

            if let Some(secondary) = &self.secondary {
                if entry.helper.is_secondary_cache_compatible() {
                    log::trace!("spilling {:?} to {}", entry.key, secondary.name());

                    if let Err(e) = secondary.insert(&entry.key, &*entry.value, entry.helper) {
                        log::trace!("{} declined {:?}: {e}", secondary.name(), entry.key);
                    }
                }
            }
        }
    }

    pub(crate) fn release(&self, entry: &Arc<Entry>, erase_if_last_ref: bool) -> bool {
        let mut evicted = vec![];
        let freed = self
            .shard(entry.hash)
            .release(entry, erase_if_last_ref, &mut evicted);
        self.notify_evicted(evicted);
        freed
    }
}

/// Sharded, capacity-bounded LRU cache of type-erased objects
///
/// Every shard keeps three LRU pools (high, low and bottom priority) whose
/// sizes are bounded by the configured pool ratios. Eviction always starts
/// with the oldest bottom-priority entry.
///
/// Entries that are pinned by a [`CacheHandle`] are never evicted.
#[derive(Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct LruCache(Arc<LruCacheInner>);

impl std::ops::Deref for LruCache {
    type Target = LruCacheInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for LruCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LruCache<shards: {}, cap: {} bytes>",
            self.shards.len(),
            self.capacity(),
        )
    }
}

impl LruCache {
    /// Creates a new cache.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is inconsistent.
    pub fn new(config: LruCacheConfig) -> crate::Result<Self> {
        config.validate()?;

        let shard_bits = config.effective_shard_bits();
        let shard_count = 1_usize << shard_bits;
        let per_shard = config.capacity.div_ceil(shard_count);

        log::debug!(
            "Creating LRU cache with {shard_count} shards of {per_shard} bytes, secondary: {:?}",
            config.secondary_cache.as_ref().map(|c| c.name()),
        );

        let shards = (0..shard_count)
            .map(|_| {
                LruCacheShard::new(
                    per_shard,
                    config.strict_capacity_limit,
                    config.high_pri_pool_ratio,
                    config.low_pri_pool_ratio,
                )
            })
            .collect();

        Ok(Self(Arc::new(LruCacheInner {
            shards,
            shard_mask: (shard_count as u64) - 1,
            capacity: AtomicUsize::new(config.capacity),
            strict_capacity_limit: AtomicBool::new(config.strict_capacity_limit),
            secondary: config.secondary_cache,
            eviction_callback: RwLock::default(),
            stats: config.statistics,
        })))
    }

    fn make_handle(&self, entry: Arc<Entry>) -> CacheHandle {
        CacheHandle {
            cache: self.0.clone(),
            entry,
            released: false,
        }
    }

    /// Inserts an object without pinning it.
    ///
    /// An existing entry with the same key is replaced. If the entry does
    /// not fit, it is dropped right away and reported as
    /// [`InsertOutcome::EvictedImmediately`].
    ///
    /// # Errors
    ///
    /// Inserts without a handle do not fail.
    pub fn insert(
        &self,
        key: CacheKey,
        value: ObjectPtr,
        helper: &'static CacheItemHelper,
        charge: usize,
        priority: Priority,
    ) -> crate::Result<InsertOutcome> {
        let entry = Arc::new(Entry::new(key, value, helper, charge, priority));
        self.insert_entry(&entry, false)
    }

    /// Inserts an object and returns a handle that pins it.
    ///
    /// # Errors
    ///
    /// Returns `MemoryLimit` if the strict capacity limit is enabled and the
    /// charge does not fit after evicting all unpinned entries.
    pub fn insert_with_handle(
        &self,
        key: CacheKey,
        value: ObjectPtr,
        helper: &'static CacheItemHelper,
        charge: usize,
        priority: Priority,
    ) -> crate::Result<(CacheHandle, InsertOutcome)> {
        let entry = Arc::new(Entry::new(key, value, helper, charge, priority));
        let outcome = self.insert_entry(&entry, true)?;
        Ok((self.make_handle(entry), outcome))
    }

    /// Inserts an object from its saved form.
    ///
    /// With [`CacheTier::NonVolatile`] and a secondary cache, the bytes are
    /// handed to the secondary cache. Otherwise the object is created with
    /// `helper` and inserted into this cache.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the object cannot be created, or the secondary
    /// cache rejects the bytes.
    pub fn insert_saved(
        &self,
        key: CacheKey,
        saved: &[u8],
        helper: &'static CacheItemHelper,
        create_context: Option<&CreateContext>,
        priority: Priority,
        tier: CacheTier,
    ) -> crate::Result<()> {
        if tier == CacheTier::NonVolatile {
            if let Some(secondary) = &self.secondary {
                return secondary.insert_saved(&key, saved);
            }
        }

        let (value, charge) = helper.create_object(saved, create_context)?;
        self.insert(key, value, helper, charge, priority)?;

        Ok(())
    }

    /// Looks up `key`, consulting the secondary cache on a miss.
    ///
    /// `helper` is needed to create the object from a secondary cache hit;
    /// without it, only the primary cache is searched.
    #[must_use]
    pub fn lookup(
        &self,
        key: &CacheKey,
        helper: Option<&'static CacheItemHelper>,
        create_context: Option<&CreateContext>,
        priority: Priority,
    ) -> Option<CacheHandle> {
        let mut handle = AsyncLookupHandle::new(*key, helper, create_context, priority);
        self.lookup_impl(&mut handle, true);
        self.wait(&mut handle);
        handle.result()
    }

    /// Starts a lookup that may complete asynchronously.
    ///
    /// Primary cache hits are resolved right away. On a miss, the lookup is
    /// forwarded to the secondary cache and the handle may stay pending
    /// until [`Self::wait`] or [`Self::wait_all`].
    ///
    /// # Panics
    ///
    /// Panics if the handle is already pending.
    pub fn start_async_lookup(&self, handle: &mut AsyncLookupHandle<'_>) {
        assert!(!handle.is_pending(), "lookup already started");
        self.lookup_impl(handle, false);
    }

    fn lookup_impl(&self, handle: &mut AsyncLookupHandle<'_>, wait: bool) {
        handle.found_dummy_entry = false;
        handle.kept_in_sec_cache = false;
        handle.result = None;

        match self.shard(handle.key.hash64()).lookup(&handle.key) {
            Lookup::Hit(entry) => {
                record_tick(self.stats.as_ref(), Ticker::BlockCacheHit, 1);
                handle.result = Some(self.make_handle(entry));
                return;
            }
            Lookup::Dummy => handle.found_dummy_entry = true,
            Lookup::Miss => {}
        }

        record_tick(self.stats.as_ref(), Ticker::BlockCacheMiss, 1);

        let (Some(helper), Some(secondary)) = (handle.helper, &self.secondary) else {
            return;
        };
        if !helper.is_secondary_cache_compatible() {
            return;
        }

        let (result, kept) = secondary.lookup(
            &handle.key,
            helper,
            handle.create_context,
            wait,
            handle.found_dummy_entry,
        );
        handle.kept_in_sec_cache = kept;

        let Some(result) = result else {
            return;
        };

        if result.is_ready() {
            handle.result = self.promote(handle, result);
        } else {
            handle.pending = Some(result);
        }
    }

    /// Turns a ready secondary cache result into a handle.
    ///
    /// The first hit only leaves a placeholder in this cache and hands out a
    /// standalone handle, as long as the secondary cache keeps the entry.
    /// A hit that finds the placeholder promotes the object for real.
    fn promote(
        &self,
        lookup: &AsyncLookupHandle<'_>,
        mut result: Box<dyn SecondaryCacheResultHandle>,
    ) -> Option<CacheHandle> {
        let helper = lookup.helper?;
        let value = result.value()?;
        let charge = result.size();

        record_tick(self.stats.as_ref(), Ticker::SecondaryCacheHits, 1);

        // NOTE: Do not spill it back if the secondary cache still has it
        let helper = if lookup.kept_in_sec_cache {
            helper.without_secondary()
        } else {
            helper
        };

        let entry = Arc::new(Entry::new(lookup.key, value, helper, charge, lookup.priority));
        let shard = self.shard(entry.hash);
        let mut evicted = vec![];

        let promoted = if !lookup.found_dummy_entry && lookup.kept_in_sec_cache {
            log::trace!("secondary cache hit for {:?}, leaving placeholder", lookup.key);

            let placeholder = Arc::new(Entry::dummy(lookup.key));
            // NOTE: The placeholder only makes the next hit promote; if it cannot
            // be admitted, that hit just leaves another one
            let _ = shard.insert(&placeholder, false, &mut evicted);

            shard.charge_standalone(&entry, &mut evicted)
        } else {
            log::trace!("promoting {:?} from secondary cache", lookup.key);

            shard.insert(&entry, true, &mut evicted).is_ok()
                || shard.charge_standalone(&entry, &mut evicted)
        };

        self.notify_evicted(evicted);

        promoted.then(|| self.make_handle(entry))
    }

    /// Blocks until the lookup is resolved; the result is then
    /// available through [`AsyncLookupHandle::result`].
    pub fn wait(&self, handle: &mut AsyncLookupHandle<'_>) {
        if let Some(mut pending) = handle.pending.take() {
            pending.wait();
            handle.result = self.promote(handle, pending);
        }
    }

    /// Blocks until all lookups are resolved.
    pub fn wait_all(&self, handles: &mut [AsyncLookupHandle<'_>]) {
        let Some(secondary) = &self.secondary else {
            return;
        };

        let (indices, mut pending): (Vec<_>, Vec<_>) = handles
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, h)| h.pending.take().map(|p| (idx, p)))
            .unzip();

        if pending.is_empty() {
            return;
        }

        secondary.wait_all(&mut pending);

        for (idx, result) in indices.into_iter().zip(pending) {
            if let Some(handle) = handles.get_mut(idx) {
                handle.result = self.promote(handle, result);
            }
        }
    }

    /// Removes `key` from the cache.
    ///
    /// A pinned entry stays alive (and charged) until its last handle is
    /// released. Returns `true` if an entry was removed.
    pub fn erase(&self, key: &CacheKey) -> bool {
        self.shard(key.hash64()).erase(key).is_some()
    }

    /// Registers the eviction callback, or clears it with `None`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when replacing a callback with another one.
    pub fn set_eviction_callback(&self, callback: Option<EvictionCallback>) -> crate::Result<()> {
        let mut slot = self.eviction_callback.write();

        if slot.is_some() && callback.is_some() {
            return Err(crate::Error::InvalidArgument(
                "Eviction callback already set".into(),
            ));
        }

        *slot = callback;
        Ok(())
    }

    /// Changes the capacity, evicting unpinned entries if needed.
    pub fn set_capacity(&self, capacity: usize) {
        let per_shard = self.per_shard_capacity(capacity);
        let mut evicted = vec![];

        for shard in &*self.shards {
            shard.set_capacity(per_shard, &mut evicted);
        }
        self.capacity.store(capacity, Ordering::Release);

        log::debug!(
            "Set cache capacity to {capacity} bytes, evicted {} entries",
            evicted.len()
        );

        self.notify_evicted(evicted);
    }

    /// Enables or disables the strict capacity limit.
    pub fn set_strict_capacity_limit(&self, strict: bool) {
        for shard in &*self.shards {
            shard.set_strict_capacity_limit(strict);
        }
        self.strict_capacity_limit.store(strict, Ordering::Release);
    }

    /// Returns `true` if inserts with a handle fail rather than exceed capacity.
    #[must_use]
    pub fn has_strict_capacity_limit(&self) -> bool {
        self.strict_capacity_limit.load(Ordering::Acquire)
    }

    /// Returns the configured capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Returns the sum of charges of all resident and pinned entries.
    #[must_use]
    pub fn usage(&self) -> usize {
        self.shards.iter().map(LruCacheShard::usage).sum()
    }

    /// Returns the sum of charges of pinned entries.
    #[must_use]
    pub fn pinned_usage(&self) -> usize {
        self.shards.iter().map(LruCacheShard::pinned_usage).sum()
    }

    /// Returns the number of entries, including placeholders.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.shards.iter().map(LruCacheShard::entry_count).sum()
    }

    /// Returns the number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Returns the secondary cache, if any.
    #[must_use]
    pub fn secondary_cache(&self) -> Option<&Arc<dyn SecondaryCache>> {
        self.secondary.as_ref()
    }

    /// Visits every entry with its key, object, charge and helper.
    ///
    /// Runs under the shard locks, so `f` must not call back into the cache.
    pub fn apply_to_all_entries<F>(&self, mut f: F)
    where
        F: FnMut(&CacheKey, &(dyn Any + Send + Sync), usize, &CacheItemHelper),
    {
        for shard in &*self.shards {
            shard.apply_to_all_entries(&mut |entry| {
                f(&entry.key, &*entry.value, entry.charge, entry.helper);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{helper::CacheEntryRole, CompressedSecondaryCache, NOOP_HELPER},
        CompressedSecondaryCacheConfig,
    };
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use test_log::test;

    fn size(obj: &(dyn Any + Send + Sync)) -> usize {
        obj.downcast_ref::<Vec<u8>>().map_or(0, Vec::len)
    }

    fn save_to(obj: &(dyn Any + Send + Sync), offset: usize, out: &mut [u8]) -> crate::Result<()> {
        let bytes = obj.downcast_ref::<Vec<u8>>().expect("should be bytes");
        out.copy_from_slice(&bytes[offset..offset + out.len()]);
        Ok(())
    }

    fn create(data: &[u8], _: Option<&CreateContext>) -> crate::Result<(ObjectPtr, usize)> {
        Ok((Box::new(data.to_vec()), data.len()))
    }

    static BYTES_NO_SECONDARY: CacheItemHelper = CacheItemHelper::new(CacheEntryRole::DataBlock);
    static BYTES_HELPER: CacheItemHelper = CacheItemHelper::with_secondary(
        CacheEntryRole::DataBlock,
        size,
        save_to,
        create,
        &BYTES_NO_SECONDARY,
    );

    fn key(n: u64) -> CacheKey {
        CacheKey::from_raw(7, n)
    }

    fn single_shard(capacity: usize) -> LruCacheConfig {
        LruCacheConfig::new(capacity)
            .num_shard_bits(0)
            .high_pri_pool_ratio(0.0)
    }

    fn insert_bytes(cache: &LruCache, n: u64, len: usize) -> crate::Result<InsertOutcome> {
        cache.insert(
            key(n),
            Box::new(vec![n as u8; len]),
            &BYTES_HELPER,
            len,
            Priority::Low,
        )
    }

    #[test]
    fn lru_cache_insert_lookup() -> crate::Result<()> {
        let stats = Statistics::new();
        let cache = LruCache::new(single_shard(1_000).statistics(stats.clone()))?;

        insert_bytes(&cache, 1, 10)?;

        let handle = cache.lookup(&key(1), None, None, Priority::Low).expect("should hit");
        assert_eq!(Some(&vec![1u8; 10]), handle.downcast::<Vec<u8>>());
        assert_eq!(10, handle.charge());
        assert!(!handle.is_standalone());
        assert_eq!(10, cache.pinned_usage());

        drop(handle);
        assert_eq!(0, cache.pinned_usage());

        assert!(cache.lookup(&key(2), None, None, Priority::Low).is_none());

        assert_eq!(1, stats.ticker(Ticker::BlockCacheHit));
        assert_eq!(1, stats.ticker(Ticker::BlockCacheMiss));
        assert_eq!(1, stats.ticker(Ticker::BlockCacheAdd));
        assert_eq!(10, stats.ticker(Ticker::BlockCacheBytesWrite));

        Ok(())
    }

    #[test]
    fn lru_cache_release_erase_if_last_ref() -> crate::Result<()> {
        let cache = LruCache::new(single_shard(1_000))?;

        let (handle, outcome) =
            cache.insert_with_handle(key(1), Box::new(1u64), &NOOP_HELPER, 10, Priority::High)?;
        assert_eq!(InsertOutcome::Resident, outcome);

        let other = cache.lookup(&key(1), None, None, Priority::Low).expect("should hit");
        assert!(!handle.release(true));
        assert!(other.release(true));

        assert_eq!(0, cache.entry_count());
        assert_eq!(0, cache.usage());

        Ok(())
    }

    #[test]
    fn lru_cache_strict_limit() -> crate::Result<()> {
        let stats = Statistics::new();
        let cache = LruCache::new(
            single_shard(100)
                .strict_capacity_limit(true)
                .statistics(stats.clone()),
        )?;
        assert!(cache.has_strict_capacity_limit());

        let (_pinned, _) =
            cache.insert_with_handle(key(1), Box::new(()), &NOOP_HELPER, 80, Priority::Low)?;

        assert!(matches!(
            cache.insert_with_handle(key(2), Box::new(()), &NOOP_HELPER, 30, Priority::Low),
            Err(crate::Error::MemoryLimit)
        ));
        assert_eq!(1, stats.ticker(Ticker::BlockCacheAddFailures));
        assert_eq!(80, cache.usage());

        cache.set_strict_capacity_limit(false);
        let (_second, outcome) =
            cache.insert_with_handle(key(2), Box::new(()), &NOOP_HELPER, 30, Priority::Low)?;
        assert_eq!(InsertOutcome::ExceedsCapacity, outcome);
        assert_eq!(110, cache.usage());

        Ok(())
    }

    #[test]
    fn lru_cache_eviction_callback() -> crate::Result<()> {
        let cache = LruCache::new(single_shard(100))?;
        let seen = Arc::new(Mutex::new(vec![]));

        {
            let seen = seen.clone();
            cache.set_eviction_callback(Some(Arc::new(move |key, _, helper| {
                seen.lock().push((*key, helper.role));
            })))?;
        }

        assert!(matches!(
            cache.set_eviction_callback(Some(Arc::new(|_, _, _| {}))),
            Err(crate::Error::InvalidArgument(_))
        ));

        for n in 0..4 {
            insert_bytes(&cache, n, 40)?;
        }
        assert_eq!(
            vec![(key(0), CacheEntryRole::DataBlock), (key(1), CacheEntryRole::DataBlock)],
            *seen.lock()
        );

        // Explicit erase is not an eviction
        assert!(cache.erase(&key(3)));
        assert_eq!(2, seen.lock().len());

        cache.set_eviction_callback(None)?;
        cache.set_eviction_callback(Some(Arc::new(|_, _, _| {})))?;

        Ok(())
    }

    #[test]
    fn lru_cache_set_capacity() -> crate::Result<()> {
        let cache = LruCache::new(single_shard(100))?;

        for n in 0..5 {
            insert_bytes(&cache, n, 20)?;
        }
        assert_eq!(100, cache.usage());

        cache.set_capacity(50);
        assert_eq!(50, cache.capacity());
        assert_eq!(40, cache.usage());

        assert!(cache.lookup(&key(0), None, None, Priority::Low).is_none());
        assert!(cache.lookup(&key(4), None, None, Priority::Low).is_some());

        Ok(())
    }

    #[test]
    fn lru_cache_apply_to_all_entries() -> crate::Result<()> {
        let cache = LruCache::new(LruCacheConfig::new(1_024 * 1_024).num_shard_bits(2))?;
        assert_eq!(4, cache.shard_count());

        for n in 0..10 {
            insert_bytes(&cache, n, 5)?;
        }

        let mut total = 0;
        let mut count = 0;
        cache.apply_to_all_entries(|_, value, charge, _| {
            assert!(value.downcast_ref::<Vec<u8>>().is_some());
            total += charge;
            count += 1;
        });
        assert_eq!(50, total);
        assert_eq!(10, count);

        Ok(())
    }

    #[test]
    fn lru_cache_secondary_promotion() -> crate::Result<()> {
        let stats = Statistics::new();
        let secondary = Arc::new(CompressedSecondaryCache::new(
            CompressedSecondaryCacheConfig::new(1_024 * 1_024),
        ));
        let cache = LruCache::new(
            single_shard(100)
                .secondary_cache(secondary.clone())
                .statistics(stats.clone()),
        )?;

        // Every entry needs two evictions to be admitted into the secondary cache
        for n in [0, 1, 0, 1] {
            insert_bytes(&cache, n, 60)?;
        }
        assert!(cache.lookup(&key(0), None, None, Priority::Low).is_none());

        // First hit leaves a placeholder and a standalone handle
        let handle = cache
            .lookup(&key(0), Some(&BYTES_HELPER), None, Priority::Low)
            .expect("should hit secondary cache");
        assert!(handle.is_standalone());
        assert_eq!(Some(&vec![0u8; 60]), handle.downcast::<Vec<u8>>());
        assert_eq!(60, cache.usage());
        drop(handle);
        assert_eq!(0, cache.usage());

        // Second hit finds the placeholder and promotes
        let handle = cache
            .lookup(&key(0), Some(&BYTES_HELPER), None, Priority::Low)
            .expect("should hit secondary cache");
        assert!(!handle.is_standalone());
        drop(handle);

        let (lookup, kept) = secondary.lookup(&key(0), &BYTES_HELPER, None, true, false);
        assert!(lookup.is_none());
        assert!(!kept);

        assert!(cache.lookup(&key(0), None, None, Priority::Low).is_some());
        assert_eq!(2, stats.ticker(Ticker::SecondaryCacheHits));
        assert_eq!(1, stats.ticker(Ticker::BlockCacheHit));

        Ok(())
    }

    #[test]
    fn lru_cache_insert_saved_tiers() -> crate::Result<()> {
        let secondary = Arc::new(CompressedSecondaryCache::new(
            CompressedSecondaryCacheConfig::new(1_024 * 1_024),
        ));
        let cache = LruCache::new(single_shard(1_000).secondary_cache(secondary.clone()))?;

        cache.insert_saved(key(1), b"volatile", &BYTES_HELPER, None, Priority::Bottom, CacheTier::Volatile)?;
        assert_eq!(1, cache.entry_count());
        assert!(secondary.is_empty());

        cache.insert_saved(key(2), b"persisted", &BYTES_HELPER, None, Priority::Bottom, CacheTier::NonVolatile)?;
        assert_eq!(1, cache.entry_count());
        assert_eq!(1, secondary.len());

        let handle = cache
            .lookup(&key(2), Some(&BYTES_HELPER), None, Priority::Low)
            .expect("should hit secondary cache");
        assert_eq!(Some(&b"persisted".to_vec()), handle.downcast::<Vec<u8>>());

        Ok(())
    }

    /// Secondary cache whose lookups only complete on `wait`
    #[derive(Default)]
    struct DeferredSecondaryCache(Mutex<HashMap<CacheKey, Vec<u8>>>);

    struct DeferredHandle {
        data: Option<Vec<u8>>,
        created: Option<(ObjectPtr, usize)>,
        ready: bool,
    }

    impl SecondaryCacheResultHandle for DeferredHandle {
        fn is_ready(&self) -> bool {
            self.ready
        }

        fn wait(&mut self) {
            if let Some(data) = self.data.take() {
                self.created = create(&data, None).ok();
            }
            self.ready = true;
        }

        fn value(&mut self) -> Option<ObjectPtr> {
            self.created.take().map(|(value, _)| value)
        }

        fn size(&self) -> usize {
            self.created.as_ref().map_or(0, |(_, size)| *size)
        }
    }

    impl SecondaryCache for DeferredSecondaryCache {
        fn name(&self) -> &'static str {
            "DeferredSecondaryCache"
        }

        fn insert(
            &self,
            key: &CacheKey,
            obj: &(dyn Any + Send + Sync),
            helper: &CacheItemHelper,
        ) -> crate::Result<()> {
            self.0.lock().insert(*key, helper.save(obj)?);
            Ok(())
        }

        fn lookup(
            &self,
            key: &CacheKey,
            _: &CacheItemHelper,
            _: Option<&CreateContext>,
            wait: bool,
            _: bool,
        ) -> (Option<Box<dyn SecondaryCacheResultHandle>>, bool) {
            let Some(data) = self.0.lock().get(key).cloned() else {
                return (None, false);
            };

            let mut handle = DeferredHandle {
                data: Some(data),
                created: None,
                ready: false,
            };
            if wait {
                handle.wait();
            }

            (Some(Box::new(handle)), false)
        }

        fn supports_force_erase(&self) -> bool {
            false
        }

        fn erase(&self, _: &CacheKey) {}
    }

    #[test]
    fn lru_cache_async_lookup() -> crate::Result<()> {
        let secondary = Arc::new(DeferredSecondaryCache::default());
        let cache = LruCache::new(single_shard(1_000).secondary_cache(secondary.clone()))?;

        secondary.insert(&key(1), &b"one".to_vec(), &BYTES_HELPER)?;
        secondary.insert(&key(2), &b"two".to_vec(), &BYTES_HELPER)?;
        insert_bytes(&cache, 3, 3)?;

        let mut handles = vec![
            AsyncLookupHandle::new(key(1), Some(&BYTES_HELPER), None, Priority::Low),
            AsyncLookupHandle::new(key(2), Some(&BYTES_HELPER), None, Priority::Low),
            AsyncLookupHandle::new(key(3), Some(&BYTES_HELPER), None, Priority::Low),
            AsyncLookupHandle::new(key(4), Some(&BYTES_HELPER), None, Priority::Low),
        ];
        for handle in &mut handles {
            cache.start_async_lookup(handle);
        }

        assert!(handles[0].is_pending());
        assert!(handles[1].is_pending());
        assert!(!handles[2].is_pending());
        assert!(!handles[3].is_pending());

        cache.wait_all(&mut handles);

        let values = handles
            .iter_mut()
            .map(|h| {
                h.result()
                    .and_then(|h| h.downcast::<Vec<u8>>().cloned())
            })
            .collect::<Vec<_>>();

        assert_eq!(
            vec![
                Some(b"one".to_vec()),
                Some(b"two".to_vec()),
                Some(vec![3u8; 3]),
                None
            ],
            values
        );

        // Not kept by the secondary cache, so promoted right away
        assert_eq!(3, cache.entry_count());

        Ok(())
    }

    #[test]
    fn lru_cache_wait_single() -> crate::Result<()> {
        let secondary = Arc::new(DeferredSecondaryCache::default());
        let cache = LruCache::new(single_shard(1_000).secondary_cache(secondary.clone()))?;
        secondary.insert(&key(1), &b"one".to_vec(), &BYTES_HELPER)?;

        let mut handle = AsyncLookupHandle::new(key(1), Some(&BYTES_HELPER), None, Priority::Low);
        cache.start_async_lookup(&mut handle);
        assert!(handle.is_pending());
        assert!(!handle.is_ready());

        cache.wait(&mut handle);
        assert!(handle.is_ready());
        assert!(handle.result().is_some());

        Ok(())
    }

    #[test]
    #[should_panic(expected = "lookup already started")]
    fn lru_cache_async_lookup_twice() {
        let secondary = Arc::new(DeferredSecondaryCache::default());
        let cache = LruCache::new(single_shard(1_000).secondary_cache(secondary.clone()))
            .expect("should create");
        secondary
            .insert(&key(1), &b"one".to_vec(), &BYTES_HELPER)
            .expect("should insert");

        let mut handle = AsyncLookupHandle::new(key(1), Some(&BYTES_HELPER), None, Priority::Low);
        cache.start_async_lookup(&mut handle);
        cache.start_async_lookup(&mut handle);
    }
}
