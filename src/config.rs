// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    cache::SecondaryCache, error_handler::SpaceManager, listener::EventListener, CompressionType,
    Statistics,
};
use std::{path::PathBuf, sync::Arc, time::Duration};

/// Minimum bytes per shard when deriving the shard count from capacity
const MIN_SHARD_SIZE: usize = 512 * 1_024;

/// Upper bound for derived shard bits
const MAX_DEFAULT_SHARD_BITS: u32 = 6;

/// Sharded LRU cache configuration
#[derive(Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct LruCacheConfig {
    /// Total capacity in bytes (sum of charges)
    pub(crate) capacity: usize,

    /// `-1` derives the shard count from capacity
    pub(crate) num_shard_bits: i32,

    pub(crate) strict_capacity_limit: bool,

    pub(crate) high_pri_pool_ratio: f64,

    pub(crate) low_pri_pool_ratio: f64,

    pub(crate) secondary_cache: Option<Arc<dyn SecondaryCache>>,

    pub(crate) statistics: Option<Arc<Statistics>>,
}

impl std::fmt::Debug for LruCacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCacheConfig")
            .field("capacity", &self.capacity)
            .field("num_shard_bits", &self.num_shard_bits)
            .field("strict_capacity_limit", &self.strict_capacity_limit)
            .field("high_pri_pool_ratio", &self.high_pri_pool_ratio)
            .field("low_pri_pool_ratio", &self.low_pri_pool_ratio)
            .field(
                "secondary_cache",
                &self.secondary_cache.as_ref().map(|c| c.name()),
            )
            .field("statistics", &self.statistics.is_some())
            .finish()
    }
}

impl Default for LruCacheConfig {
    fn default() -> Self {
        Self::new(32 * 1_024 * 1_024)
    }
}

impl LruCacheConfig {
    /// Creates a new configuration builder with `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            num_shard_bits: -1,
            strict_capacity_limit: false,
            high_pri_pool_ratio: 0.5,
            low_pri_pool_ratio: 0.0,
            secondary_cache: None,
            statistics: None,
        }
    }

    /// Sets the number of shard bits, the cache is split into `2^bits` shards.
    ///
    /// A negative value derives the shard count from the capacity, so that
    /// each shard holds at least 512 KiB, using at most 64 shards.
    ///
    /// Default = -1
    #[must_use]
    pub fn num_shard_bits(mut self, bits: i32) -> Self {
        self.num_shard_bits = bits;
        self
    }

    /// If `true`, inserts that cannot be satisfied after eviction fail,
    /// instead of letting the cache grow beyond its capacity.
    ///
    /// Default = false
    #[must_use]
    pub fn strict_capacity_limit(mut self, strict: bool) -> Self {
        self.strict_capacity_limit = strict;
        self
    }

    /// Sets the share of capacity reserved for high priority entries.
    ///
    /// Default = 0.5
    #[must_use]
    pub fn high_pri_pool_ratio(mut self, ratio: f64) -> Self {
        self.high_pri_pool_ratio = ratio;
        self
    }

    /// Sets the share of capacity reserved for low priority entries.
    ///
    /// Default = 0.0
    #[must_use]
    pub fn low_pri_pool_ratio(mut self, ratio: f64) -> Self {
        self.low_pri_pool_ratio = ratio;
        self
    }

    /// Sets a secondary tier that evicted entries are spilled to
    /// and misses are promoted from.
    #[must_use]
    pub fn secondary_cache(mut self, cache: Arc<dyn SecondaryCache>) -> Self {
        self.secondary_cache = Some(cache);
        self
    }

    /// Sets the statistics sink for hit, miss and insert tickers.
    #[must_use]
    pub fn statistics(mut self, statistics: Arc<Statistics>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// Checks the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for out-of-range pool ratios or shard bits.
    pub fn validate(&self) -> crate::Result<()> {
        if self.num_shard_bits >= 20 {
            return Err(crate::Error::InvalidArgument(
                "The cache cannot be sharded into too many fine pieces".into(),
            ));
        }

        for (name, ratio) in [
            ("high_pri_pool_ratio", self.high_pri_pool_ratio),
            ("low_pri_pool_ratio", self.low_pri_pool_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(crate::Error::InvalidArgument(format!(
                    "{name} must be in [0, 1], got {ratio}"
                )));
            }
        }

        if self.high_pri_pool_ratio + self.low_pri_pool_ratio > 1.0 {
            return Err(crate::Error::InvalidArgument(
                "Sum of high_pri_pool_ratio and low_pri_pool_ratio exceeds 1.0".into(),
            ));
        }

        Ok(())
    }

    /// Shard bits after resolving the "derive from capacity" default.
    #[allow(clippy::cast_sign_loss)]
    pub(crate) fn effective_shard_bits(&self) -> u32 {
        if self.num_shard_bits >= 0 {
            return self.num_shard_bits as u32;
        }

        let mut bits = 0;
        let mut num_shards = self.capacity / MIN_SHARD_SIZE;

        loop {
            num_shards >>= 1;
            if num_shards == 0 {
                return bits;
            }

            bits += 1;
            if bits >= MAX_DEFAULT_SHARD_BITS {
                return bits;
            }
        }
    }
}

/// Compressed secondary cache configuration
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(clippy::module_name_repetitions)]
pub struct CompressedSecondaryCacheConfig {
    pub(crate) capacity: u64,
    pub(crate) compression: CompressionType,
}

impl Default for CompressedSecondaryCacheConfig {
    fn default() -> Self {
        Self::new(64 * 1_024 * 1_024)
    }
}

impl CompressedSecondaryCacheConfig {
    /// Creates a new configuration builder with `capacity` bytes.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            compression: CompressionType::default(),
        }
    }

    /// Sets the compression applied to saved entries.
    ///
    /// Default = no compression
    #[must_use]
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }
}

/// Whether freshly written blobs are also inserted into the blob cache
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum PrepopulateBlobCache {
    /// Never prepopulate
    #[default]
    Disable,

    /// Only prepopulate blobs written by flushes
    FlushOnly,
}

/// Blob file writer configuration
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(clippy::module_name_repetitions)]
pub struct BlobFileConfig {
    pub(crate) min_blob_size: u64,
    pub(crate) blob_file_size: u64,
    pub(crate) compression: CompressionType,
    pub(crate) prepopulate_blob_cache: PrepopulateBlobCache,
    pub(crate) enable_file_checksum: bool,
    pub(crate) use_fsync: bool,
}

impl Default for BlobFileConfig {
    fn default() -> Self {
        Self {
            min_blob_size: 0,
            blob_file_size: 256 * 1_024 * 1_024,
            compression: CompressionType::None,
            prepopulate_blob_cache: PrepopulateBlobCache::Disable,
            enable_file_checksum: true,
            use_fsync: false,
        }
    }
}

impl BlobFileConfig {
    /// Values smaller than this are kept inline and never written to a blob file.
    ///
    /// Default = 0
    #[must_use]
    pub fn min_blob_size(mut self, bytes: u64) -> Self {
        self.min_blob_size = bytes;
        self
    }

    /// Sets the size at which a blob file is closed and a new one started.
    ///
    /// Default = 256 MiB
    #[must_use]
    pub fn blob_file_size(mut self, bytes: u64) -> Self {
        self.blob_file_size = bytes;
        self
    }

    /// Sets the compression applied to each value.
    ///
    /// Default = no compression
    #[must_use]
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the blob cache prepopulation policy.
    ///
    /// Default = disabled
    #[must_use]
    pub fn prepopulate_blob_cache(mut self, policy: PrepopulateBlobCache) -> Self {
        self.prepopulate_blob_cache = policy;
        self
    }

    /// Computes a whole-file checksum that is recorded in the file addition.
    ///
    /// Default = true
    #[must_use]
    pub fn enable_file_checksum(mut self, enabled: bool) -> Self {
        self.enable_file_checksum = enabled;
        self
    }

    /// Uses a full `fsync` instead of `fdatasync` when syncing blob files.
    ///
    /// Default = false
    #[must_use]
    pub fn use_fsync(mut self, enabled: bool) -> Self {
        self.use_fsync = enabled;
        self
    }
}

/// Background error handler configuration
#[derive(Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct ErrorHandlerConfig {
    pub(crate) paranoid_checks: bool,
    pub(crate) max_bgerror_resume_count: i32,
    pub(crate) bgerror_resume_retry_interval: Duration,
    pub(crate) allow_2pc: bool,
    pub(crate) db_path: PathBuf,
    pub(crate) listeners: Vec<Arc<dyn EventListener>>,
    pub(crate) space_manager: Option<Arc<dyn SpaceManager>>,
    pub(crate) statistics: Option<Arc<Statistics>>,
}

impl std::fmt::Debug for ErrorHandlerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandlerConfig")
            .field("paranoid_checks", &self.paranoid_checks)
            .field("max_bgerror_resume_count", &self.max_bgerror_resume_count)
            .field(
                "bgerror_resume_retry_interval",
                &self.bgerror_resume_retry_interval,
            )
            .field("allow_2pc", &self.allow_2pc)
            .field("db_path", &self.db_path)
            .field("listeners", &self.listeners.len())
            .field("space_manager", &self.space_manager.is_some())
            .field("statistics", &self.statistics.is_some())
            .finish()
    }
}

impl Default for ErrorHandlerConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

impl ErrorHandlerConfig {
    /// Creates a new configuration builder.
    ///
    /// `db_path` is the directory probed for free space during recovery.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(db_path: P) -> Self {
        Self {
            paranoid_checks: true,
            max_bgerror_resume_count: i32::MAX,
            bgerror_resume_retry_interval: Duration::from_secs(1),
            allow_2pc: false,
            db_path: db_path.into(),
            listeners: vec![],
            space_manager: None,
            statistics: None,
        }
    }

    /// Makes corruption and I/O errors in background jobs stop the engine.
    ///
    /// Default = true
    #[must_use]
    pub fn paranoid_checks(mut self, enabled: bool) -> Self {
        self.paranoid_checks = enabled;
        self
    }

    /// Sets how many times auto-resume is attempted; 0 or less disables it.
    ///
    /// Default = `i32::MAX`
    #[must_use]
    pub fn max_bgerror_resume_count(mut self, count: i32) -> Self {
        self.max_bgerror_resume_count = count;
        self
    }

    /// Sets the wait between two auto-resume attempts.
    ///
    /// Default = 1 second
    #[must_use]
    pub fn bgerror_resume_retry_interval(mut self, interval: Duration) -> Self {
        self.bgerror_resume_retry_interval = interval;
        self
    }

    /// Declares that two-phase commit is in use.
    ///
    /// Soft out-of-space errors are escalated to fatal in that case.
    ///
    /// Default = false
    #[must_use]
    pub fn allow_2pc(mut self, enabled: bool) -> Self {
        self.allow_2pc = enabled;
        self
    }

    /// Adds a listener for background error and recovery events.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Sets the space manager that recovers from out-of-space errors.
    ///
    /// Without one, out-of-space errors are never recovered automatically.
    #[must_use]
    pub fn space_manager(mut self, space_manager: Arc<dyn SpaceManager>) -> Self {
        self.space_manager = Some(space_manager);
        self
    }

    /// Sets the statistics sink for error handler tickers.
    #[must_use]
    pub fn statistics(mut self, statistics: Arc<Statistics>) -> Self {
        self.statistics = Some(statistics);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn lru_config_default_shard_bits() {
        assert_eq!(0, LruCacheConfig::new(100).effective_shard_bits());
        assert_eq!(1, LruCacheConfig::new(1_024 * 1_024).effective_shard_bits());
        assert_eq!(3, LruCacheConfig::new(4 * 1_024 * 1_024).effective_shard_bits());
        assert_eq!(6, LruCacheConfig::new(1_024 * 1_024 * 1_024).effective_shard_bits());
        assert_eq!(
            3,
            LruCacheConfig::new(1_024 * 1_024 * 1_024)
                .num_shard_bits(3)
                .effective_shard_bits()
        );
    }

    #[test]
    fn lru_config_validate() {
        assert!(LruCacheConfig::default().validate().is_ok());

        assert!(matches!(
            LruCacheConfig::default().num_shard_bits(20).validate(),
            Err(crate::Error::InvalidArgument(_))
        ));
        assert!(matches!(
            LruCacheConfig::default().high_pri_pool_ratio(1.5).validate(),
            Err(crate::Error::InvalidArgument(_))
        ));
        assert!(matches!(
            LruCacheConfig::default().low_pri_pool_ratio(-0.1).validate(),
            Err(crate::Error::InvalidArgument(_))
        ));
        assert!(matches!(
            LruCacheConfig::default()
                .high_pri_pool_ratio(0.6)
                .low_pri_pool_ratio(0.6)
                .validate(),
            Err(crate::Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn error_handler_config_defaults() {
        let config = ErrorHandlerConfig::default();
        assert!(config.paranoid_checks);
        assert_eq!(i32::MAX, config.max_bgerror_resume_count);
        assert_eq!(Duration::from_secs(1), config.bgerror_resume_retry_interval);
        assert!(!config.allow_2pc);
    }
}
