// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    helper::{CacheEntryRole, CacheItemHelper, CreateContext, ObjectPtr},
    CacheKey,
};
use std::any::Any;

/// Result of a secondary cache lookup
///
/// A handle is either pending, ready without a value (miss) or ready with
/// a freshly created object that is moved out by [`Self::value`].
pub trait SecondaryCacheResultHandle: Send {
    /// Returns `true` once the lookup has completed.
    fn is_ready(&self) -> bool;

    /// Blocks until the lookup has completed.
    fn wait(&mut self);

    /// Takes the created object; `None` means the lookup missed.
    ///
    /// Must only be called once the handle is ready.
    fn value(&mut self) -> Option<ObjectPtr>;

    /// Charge reported by the helper's create function.
    fn size(&self) -> usize;
}

/// Best-effort second cache tier
///
/// Implementations may decline to store or find anything; `Ok` from an
/// insert does not guarantee the entry can be looked up later.
pub trait SecondaryCache: Send + Sync {
    /// Name of the implementation.
    fn name(&self) -> &'static str;

    /// Suggests persisting `obj`, using `helper` to save it.
    ///
    /// # Errors
    ///
    /// Will return `Err` if saving the object fails.
    fn insert(
        &self,
        key: &CacheKey,
        obj: &(dyn Any + Send + Sync),
        helper: &CacheItemHelper,
    ) -> crate::Result<()>;

    /// Suggests persisting already saved bytes, for warming up the cache
    /// from an external source.
    ///
    /// # Errors
    ///
    /// Will return `Err` if storing fails.
    fn insert_saved(&self, key: &CacheKey, saved: &[u8]) -> crate::Result<()> {
        self.insert(key, &saved.to_vec(), &SAVED_BYTES_HELPER)
    }

    /// Looks up `key`, creating the object with `helper`.
    ///
    /// If `wait` is false, the returned handle may be pending. `advise_erase`
    /// hints that the primary cache will own the entry from now on.
    ///
    /// Also returns whether the entry is kept in this cache.
    fn lookup(
        &self,
        key: &CacheKey,
        helper: &CacheItemHelper,
        create_context: Option<&CreateContext>,
        wait: bool,
        advise_erase: bool,
    ) -> (Option<Box<dyn SecondaryCacheResultHandle>>, bool);

    /// Returns `true` if [`Self::erase`] actually removes entries.
    fn supports_force_erase(&self) -> bool;

    /// Removes `key`, at the discretion of the implementation.
    fn erase(&self, key: &CacheKey);

    /// Blocks until all handles are ready.
    ///
    /// Implementations with a true asynchronous path may batch the waits.
    fn wait_all(&self, handles: &mut [Box<dyn SecondaryCacheResultHandle>]) {
        for handle in handles {
            handle.wait();
        }
    }

    /// Sets the capacity in bytes.
    ///
    /// # Errors
    ///
    /// Returns `NotSupported` unless the implementation can be resized.
    fn set_capacity(&self, _capacity: u64) -> crate::Result<()> {
        Err(crate::Error::NotSupported("SetCapacity".into()))
    }

    /// Returns the capacity in bytes.
    ///
    /// # Errors
    ///
    /// Returns `NotSupported` unless the implementation tracks a capacity.
    fn capacity(&self) -> crate::Result<u64> {
        Err(crate::Error::NotSupported("GetCapacity".into()))
    }

    /// Temporarily lowers the capacity, possibly unevenly across shards.
    ///
    /// # Errors
    ///
    /// Returns `NotSupported` unless implemented.
    fn deflate(&self, _decrease: u64) -> crate::Result<()> {
        Err(crate::Error::NotSupported("Deflate".into()))
    }

    /// Restores capacity taken away by [`Self::deflate`].
    ///
    /// # Errors
    ///
    /// Returns `NotSupported` unless implemented.
    fn inflate(&self, _increase: u64) -> crate::Result<()> {
        Err(crate::Error::NotSupported("Inflate".into()))
    }
}

fn saved_bytes_size(obj: &(dyn Any + Send + Sync)) -> usize {
    obj.downcast_ref::<Vec<u8>>().map_or(0, Vec::len)
}

fn saved_bytes_save_to(
    obj: &(dyn Any + Send + Sync),
    offset: usize,
    out: &mut [u8],
) -> crate::Result<()> {
    let src = obj
        .downcast_ref::<Vec<u8>>()
        .and_then(|bytes| bytes.get(offset..offset + out.len()))
        .ok_or_else(|| crate::Error::InvalidArgument("saved bytes out of range".into()))?;

    out.copy_from_slice(src);
    Ok(())
}

fn saved_bytes_fail_create(
    _: &[u8],
    _: Option<&CreateContext>,
) -> crate::Result<(ObjectPtr, usize)> {
    Err(crate::Error::NotSupported(
        "Only for dumping data into SecondaryCache".into(),
    ))
}

static SAVED_BYTES_NO_SECONDARY: CacheItemHelper = CacheItemHelper::new(CacheEntryRole::Misc);

/// Wraps raw saved bytes for [`SecondaryCache::insert_saved`]
///
/// Write-only: objects can be saved, but never created from it.
pub(crate) static SAVED_BYTES_HELPER: CacheItemHelper = CacheItemHelper::with_secondary(
    CacheEntryRole::Misc,
    saved_bytes_size,
    saved_bytes_save_to,
    saved_bytes_fail_create,
    &SAVED_BYTES_NO_SECONDARY,
);

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use test_log::test;

    /// Keeps everything it is given, never finds anything
    #[derive(Default)]
    struct RecordingSecondaryCache(Mutex<Vec<(CacheKey, Vec<u8>, CacheEntryRole)>>);

    impl SecondaryCache for RecordingSecondaryCache {
        fn name(&self) -> &'static str {
            "RecordingSecondaryCache"
        }

        fn insert(
            &self,
            key: &CacheKey,
            obj: &(dyn Any + Send + Sync),
            helper: &CacheItemHelper,
        ) -> crate::Result<()> {
            let saved = helper.save(obj)?;
            assert!(helper.create_object(&saved, None).is_err());
            self.0.lock().push((*key, saved, helper.role));
            Ok(())
        }

        fn lookup(
            &self,
            _: &CacheKey,
            _: &CacheItemHelper,
            _: Option<&CreateContext>,
            _: bool,
            _: bool,
        ) -> (Option<Box<dyn SecondaryCacheResultHandle>>, bool) {
            (None, false)
        }

        fn supports_force_erase(&self) -> bool {
            false
        }

        fn erase(&self, _: &CacheKey) {}
    }

    #[test]
    fn secondary_insert_saved_default() -> crate::Result<()> {
        let cache = RecordingSecondaryCache::default();
        let key = CacheKey::from_raw(1, 2);

        cache.insert_saved(&key, b"saved block")?;

        assert_eq!(
            vec![(key, b"saved block".to_vec(), CacheEntryRole::Misc)],
            *cache.0.lock()
        );

        Ok(())
    }

    #[test]
    fn secondary_saved_helper_is_write_only() {
        assert!(SAVED_BYTES_HELPER.is_secondary_cache_compatible());
        assert!(matches!(
            SAVED_BYTES_HELPER.create_object(b"abc", None),
            Err(crate::Error::NotSupported(msg)) if msg == "Only for dumping data into SecondaryCache"
        ));
    }

    #[test]
    fn secondary_capacity_not_supported() {
        let cache = RecordingSecondaryCache::default();
        assert!(matches!(cache.set_capacity(1), Err(crate::Error::NotSupported(_))));
        assert!(matches!(cache.capacity(), Err(crate::Error::NotSupported(_))));
        assert!(matches!(cache.deflate(1), Err(crate::Error::NotSupported(_))));
        assert!(matches!(cache.inflate(1), Err(crate::Error::NotSupported(_))));
    }
}
