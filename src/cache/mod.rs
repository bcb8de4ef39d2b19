// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! In-memory block cache with an optional secondary tier.
//!
//! The primary cache ([`LruCache`]) holds decoded, type-erased objects and
//! bounds the sum of their charges. It is split into shards, each guarded by
//! its own mutex and managing three LRU pools (high, low, bottom priority).
//!
//! Entries evicted from the primary cache are offered to the
//! [`SecondaryCache`], if configured; misses consult the secondary cache
//! and promote hits back into the primary cache.

mod compressed_secondary;
mod handle;
mod helper;
mod key;
mod lru;
mod secondary;
mod shard;

pub use {
    compressed_secondary::CompressedSecondaryCache,
    handle::{AsyncLookupHandle, CacheHandle},
    helper::{
        CacheEntryRole, CacheItemHelper, CreateContext, CreateFn, ObjectPtr, SaveToFn, SizeFn,
        NOOP_HELPER,
    },
    key::{CacheKey, OffsetableCacheKey},
    lru::{EvictionCallback, LruCache},
    secondary::{SecondaryCache, SecondaryCacheResultHandle},
};

/// Eviction priority of an entry
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Priority {
    /// Kept in the high priority pool
    High,

    /// Kept in the low priority pool
    #[default]
    Low,

    /// Evicted first
    Bottom,
}

/// Lowest cache tier a saved entry may be placed in
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CacheTier {
    /// Primary, in-memory cache only
    #[default]
    Volatile,

    /// The secondary cache tier
    NonVolatile,
}

/// How an insert was resolved
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InsertOutcome {
    /// Entry is resident and usage is within capacity
    Resident,

    /// Entry is resident, but not enough unpinned entries could be
    /// evicted, so usage exceeds capacity until handles are released
    ExceedsCapacity,

    /// Entry did not fit and was dropped right away, as if inserted and
    /// then evicted
    EvictedImmediately,
}
