// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

#![allow(dead_code)]

use std::any::Any;
use storage_kernel::{
    cache::{CacheEntryRole, CacheItemHelper, CacheKey, CreateContext, ObjectPtr},
    LruCacheConfig,
};

fn size(obj: &(dyn Any + Send + Sync)) -> usize {
    obj.downcast_ref::<Vec<u8>>().map_or(0, Vec::len)
}

fn save_to(
    obj: &(dyn Any + Send + Sync),
    offset: usize,
    out: &mut [u8],
) -> storage_kernel::Result<()> {
    let bytes = obj
        .downcast_ref::<Vec<u8>>()
        .and_then(|b| b.get(offset..offset + out.len()))
        .ok_or_else(|| storage_kernel::Error::InvalidArgument("not bytes".into()))?;

    out.copy_from_slice(bytes);
    Ok(())
}

fn create(data: &[u8], _: Option<&CreateContext>) -> storage_kernel::Result<(ObjectPtr, usize)> {
    Ok((Box::new(data.to_vec()), data.len()))
}

static BYTES_NO_SECONDARY: CacheItemHelper = CacheItemHelper::new(CacheEntryRole::DataBlock);

/// Helper for `Vec<u8>` objects, charged by length
pub static BYTES_HELPER: CacheItemHelper = CacheItemHelper::with_secondary(
    CacheEntryRole::DataBlock,
    size,
    save_to,
    create,
    &BYTES_NO_SECONDARY,
);

pub fn key(n: u64) -> CacheKey {
    CacheKey::from_raw(42, n)
}

/// Single shard, no high or low priority pool
pub fn single_shard(capacity: usize) -> LruCacheConfig {
    LruCacheConfig::new(capacity)
        .num_shard_bits(0)
        .high_pri_pool_ratio(0.0)
        .low_pri_pool_ratio(0.0)
}
