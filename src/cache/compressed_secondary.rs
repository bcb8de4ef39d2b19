// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    helper::{CacheItemHelper, CreateContext, ObjectPtr},
    secondary::{SecondaryCache, SecondaryCacheResultHandle},
    CacheKey,
};
use crate::{CompressedSecondaryCacheConfig, CompressionType};
use parking_lot::RwLock;
use quick_cache::{
    sync::{Cache, DefaultLifecycle},
    Weighter,
};
use std::{
    any::Any,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

#[derive(Clone)]
enum Item {
    /// Remembers a first insert attempt; only a second one stores data
    Placeholder,

    /// Saved, possibly compressed, object
    Saved(Arc<[u8]>),
}

#[derive(Clone)]
struct ItemWeighter;

impl Weighter<CacheKey, Item> for ItemWeighter {
    fn weight(&self, _: &CacheKey, item: &Item) -> u64 {
        match item {
            Item::Placeholder => CacheKey::LEN as u64,
            Item::Saved(bytes) => (CacheKey::LEN + bytes.len()) as u64,
        }
    }
}

type Store = Cache<CacheKey, Item, ItemWeighter, ahash::RandomState>;

fn new_store(capacity: u64) -> Store {
    #[allow(clippy::cast_possible_truncation)]
    let estimated_items = (capacity / 4_096).clamp(64, 100_000) as usize;

    Cache::with(
        estimated_items,
        capacity.max(1),
        ItemWeighter,
        ahash::RandomState::default(),
        DefaultLifecycle::default(),
    )
}

/// Always-ready result of a [`CompressedSecondaryCache`] lookup
struct ReadyHandle {
    value: Option<ObjectPtr>,
    size: usize,
}

impl SecondaryCacheResultHandle for ReadyHandle {
    fn is_ready(&self) -> bool {
        true
    }

    fn wait(&mut self) {}

    fn value(&mut self) -> Option<ObjectPtr> {
        self.value.take()
    }

    fn size(&self) -> usize {
        self.size
    }
}

/// In-memory secondary cache holding saved, optionally compressed, objects
///
/// Entries are admitted on their second insert, so objects that are evicted
/// once and never again do not take up space.
pub struct CompressedSecondaryCache {
    store: RwLock<Store>,
    capacity: AtomicU64,
    compression: CompressionType,
}

impl std::fmt::Debug for CompressedSecondaryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CompressedSecondaryCache<cap: {} bytes, {}>",
            self.capacity.load(Ordering::Relaxed),
            self.compression
        )
    }
}

impl CompressedSecondaryCache {
    /// Creates a new compressed secondary cache.
    #[must_use]
    pub fn new(config: CompressedSecondaryCacheConfig) -> Self {
        Self {
            store: RwLock::new(new_store(config.capacity)),
            capacity: AtomicU64::new(config.capacity),
            compression: config.compression,
        }
    }

    /// Returns the stored size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.store.read().weight()
    }

    /// Returns the number of stored entries (including placeholders).
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store_saved(&self, key: &CacheKey, saved: &[u8]) -> crate::Result<()> {
        let compressed = self.compression.compress(saved)?;

        log::trace!(
            "compressed secondary cache: storing {key:?} ({} -> {} bytes)",
            saved.len(),
            compressed.len()
        );

        self.store
            .read()
            .insert(*key, Item::Saved(compressed.into()));

        Ok(())
    }
}

impl SecondaryCache for CompressedSecondaryCache {
    fn name(&self) -> &'static str {
        "CompressedSecondaryCache"
    }

    fn insert(
        &self,
        key: &CacheKey,
        obj: &(dyn Any + Send + Sync),
        helper: &CacheItemHelper,
    ) -> crate::Result<()> {
        if !helper.is_secondary_cache_compatible() {
            return Ok(());
        }

        {
            let store = self.store.read();
            if store.get(key).is_none() {
                store.insert(*key, Item::Placeholder);
                return Ok(());
            }
        }

        let saved = helper.save(obj)?;
        self.store_saved(key, &saved)
    }

    fn insert_saved(&self, key: &CacheKey, saved: &[u8]) -> crate::Result<()> {
        self.store_saved(key, saved)
    }

    fn lookup(
        &self,
        key: &CacheKey,
        helper: &CacheItemHelper,
        create_context: Option<&CreateContext>,
        _wait: bool,
        advise_erase: bool,
    ) -> (Option<Box<dyn SecondaryCacheResultHandle>>, bool) {
        let Some(Item::Saved(data)) = self.store.read().get(key) else {
            return (None, false);
        };

        let created = self
            .compression
            .decompress(&data)
            .and_then(|raw| helper.create_object(&raw, create_context));

        let (value, size) = match created {
            Ok(created) => created,
            Err(e) => {
                log::debug!("compressed secondary cache: could not create {key:?}: {e}");
                return (None, false);
            }
        };

        let kept = if advise_erase {
            self.erase(key);
            false
        } else {
            true
        };

        (
            Some(Box::new(ReadyHandle {
                value: Some(value),
                size,
            })),
            kept,
        )
    }

    fn supports_force_erase(&self) -> bool {
        true
    }

    fn erase(&self, key: &CacheKey) {
        self.store.read().remove(key);
    }

    fn set_capacity(&self, capacity: u64) -> crate::Result<()> {
        log::debug!("compressed secondary cache: resizing to {capacity} bytes, dropping contents");

        *self.store.write() = new_store(capacity);
        self.capacity.store(capacity, Ordering::Release);

        Ok(())
    }

    fn capacity(&self) -> crate::Result<u64> {
        Ok(self.capacity.load(Ordering::Acquire))
    }
}
