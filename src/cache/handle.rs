// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    helper::{CacheItemHelper, CreateContext, ObjectPtr, NOOP_HELPER},
    lru::LruCacheInner,
    secondary::SecondaryCacheResultHandle,
    CacheKey, Priority,
};
use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

/// Shared cache entry
///
/// `refs` counts outstanding handles. `in_cache` is true while the entry is
/// reachable through its shard's table. `charged` is true while the shard's
/// usage still includes `charge`. The two flags only change under the shard lock.
pub(crate) struct Entry {
    pub(crate) key: CacheKey,
    pub(crate) hash: u64,
    pub(crate) value: ObjectPtr,
    pub(crate) helper: &'static CacheItemHelper,
    pub(crate) charge: usize,
    pub(crate) priority: Priority,

    /// Placeholder that remembers a secondary cache hit
    pub(crate) dummy: bool,

    pub(crate) refs: AtomicUsize,
    pub(crate) in_cache: AtomicBool,
    pub(crate) charged: AtomicBool,
}

impl Entry {
    pub(crate) fn new(
        key: CacheKey,
        value: ObjectPtr,
        helper: &'static CacheItemHelper,
        charge: usize,
        priority: Priority,
    ) -> Self {
        Self {
            key,
            hash: key.hash64(),
            value,
            helper,
            charge,
            priority,
            dummy: false,
            refs: AtomicUsize::new(0),
            in_cache: AtomicBool::new(false),
            charged: AtomicBool::new(false),
        }
    }

    pub(crate) fn dummy(key: CacheKey) -> Self {
        Self {
            dummy: true,
            ..Self::new(key, Box::new(()), &NOOP_HELPER, 0, Priority::Low)
        }
    }

    pub(crate) fn has_refs(&self) -> bool {
        self.refs.load(Ordering::Acquire) > 0
    }

    pub(crate) fn is_in_cache(&self) -> bool {
        self.in_cache.load(Ordering::Acquire)
    }
}

/// Pinned reference to a cache entry
///
/// The entry cannot be evicted while a handle to it exists. Dropping the
/// handle releases it; [`CacheHandle::release`] additionally allows
/// erasing the entry if this was the last reference.
#[allow(clippy::module_name_repetitions)]
pub struct CacheHandle {
    pub(crate) cache: Arc<LruCacheInner>,
    pub(crate) entry: Arc<Entry>,
    pub(crate) released: bool,
}

impl std::fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CacheHandle<{:?}, charge: {}>",
            self.entry.key, self.entry.charge
        )
    }
}

impl CacheHandle {
    /// Returns the entry key.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.entry.key
    }

    /// Returns the cached object.
    #[must_use]
    pub fn value(&self) -> &(dyn Any + Send + Sync) {
        &*self.entry.value
    }

    /// Returns the cached object, if it is a `T`.
    #[must_use]
    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.value().downcast_ref::<T>()
    }

    /// Returns the bytes charged against the cache capacity.
    #[must_use]
    pub fn charge(&self) -> usize {
        self.entry.charge
    }

    /// Returns the helper the entry was inserted with.
    #[must_use]
    pub fn helper(&self) -> &'static CacheItemHelper {
        self.entry.helper
    }

    /// Returns `true` if the handle is not backed by a cache slot.
    ///
    /// Standalone handles are handed out for secondary cache hits that were
    /// not (yet) promoted.
    #[must_use]
    pub fn is_standalone(&self) -> bool {
        !self.entry.is_in_cache()
    }

    /// Releases the handle.
    ///
    /// If `erase_if_last_ref` is set and no other handle refers to the entry,
    /// it is removed from the cache. Returns `true` if the entry was freed.
    #[must_use = "returns whether the entry was freed"]
    pub fn release(mut self, erase_if_last_ref: bool) -> bool {
        self.released = true;
        self.cache.release(&self.entry, erase_if_last_ref)
    }
}

impl Drop for CacheHandle {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            let _ = self.cache.release(&self.entry, false);
        }
    }
}

/// Lookup that may complete asynchronously
///
/// Created with the lookup parameters, passed to
/// [`LruCache::start_async_lookup`](super::LruCache::start_async_lookup) and
/// resolved by [`LruCache::wait`](super::LruCache::wait) or
/// [`LruCache::wait_all`](super::LruCache::wait_all).
pub struct AsyncLookupHandle<'a> {
    /// Key to look up
    pub key: CacheKey,

    /// Helper used to create the object on a secondary cache hit
    pub helper: Option<&'static CacheItemHelper>,

    /// Passed through to the helper's create function
    pub create_context: Option<&'a CreateContext>,

    /// Priority of the entry if it gets promoted
    pub priority: Priority,

    pub(crate) found_dummy_entry: bool,
    pub(crate) kept_in_sec_cache: bool,
    pub(crate) pending: Option<Box<dyn SecondaryCacheResultHandle>>,
    pub(crate) result: Option<CacheHandle>,
}

impl<'a> AsyncLookupHandle<'a> {
    /// Creates a lookup that has not been started.
    #[must_use]
    pub fn new(
        key: CacheKey,
        helper: Option<&'static CacheItemHelper>,
        create_context: Option<&'a CreateContext>,
        priority: Priority,
    ) -> Self {
        Self {
            key,
            helper,
            create_context,
            priority,
            found_dummy_entry: false,
            kept_in_sec_cache: false,
            pending: None,
            result: None,
        }
    }

    /// Returns `true` while a secondary cache lookup is outstanding.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns `true` if `result` may be called without blocking.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.pending.as_ref().map_or(true, |p| p.is_ready())
    }

    /// Returns `true` if the primary cache held a placeholder for the key.
    #[must_use]
    pub fn found_dummy_entry(&self) -> bool {
        self.found_dummy_entry
    }

    /// Takes the lookup result (`None` is a miss).
    ///
    /// # Panics
    ///
    /// Panics if the lookup is still pending.
    pub fn result(&mut self) -> Option<CacheHandle> {
        assert!(!self.is_pending(), "result of a pending lookup");
        self.result.take()
    }
}
