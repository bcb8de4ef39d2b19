// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

macro_rules! named_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $label:literal,)* }) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)*
        }

        impl $name {
            /// All variants, in declaration order
            pub const ALL: &'static [Self] = &[$(Self::$variant,)*];

            /// Returns the stable metric name.
            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)*
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.name())
            }
        }
    };
}

named_enum!(
    /// Monotonic counters
    Ticker {
        /// Primary cache lookup hit
        BlockCacheHit => "block.cache.hit",
        /// Primary cache lookup miss
        BlockCacheMiss => "block.cache.miss",
        /// Successful primary cache insert
        BlockCacheAdd => "block.cache.add",
        /// Rejected primary cache insert
        BlockCacheAddFailures => "block.cache.add.failures",
        /// Charge inserted into the primary cache
        BlockCacheBytesWrite => "block.cache.bytes.write",
        /// Miss in the primary cache served by the secondary tier
        SecondaryCacheHits => "secondary.cache.hits",
        /// Bytes appended to blob files
        BlobFileBytesWritten => "blobdb.blob.file.bytes.written",
        /// Blob file syncs
        BlobFileSynced => "blobdb.blob.file.synced",
        /// Blobs prepopulated into the blob cache
        BlobCacheAdd => "blobdb.cache.add",
        /// Failed blob cache prepopulation
        BlobCacheAddFailures => "blobdb.cache.add.failures",
        /// Bytes prepopulated into the blob cache
        BlobCacheBytesWrite => "blobdb.cache.bytes.write",
        /// Background errors handled
        ErrorHandlerBgErrorCount => "error.handler.bg.error.count",
        /// Background I/O errors handled
        ErrorHandlerBgIoErrorCount => "error.handler.bg.io.error.count",
        /// Retryable background I/O errors handled
        ErrorHandlerBgRetryableIoErrorCount => "error.handler.bg.retryable.io.error.count",
        /// Auto-resume loops started
        ErrorHandlerAutoresumeCount => "error.handler.autoresume.count",
        /// Total auto-resume attempts
        ErrorHandlerAutoresumeRetryTotalCount => "error.handler.autoresume.retry.total.count",
        /// Auto-resume loops that recovered
        ErrorHandlerAutoresumeSuccessCount => "error.handler.autoresume.success.count",
    }
);

named_enum!(
    /// Value distributions
    Histogram {
        /// Attempts needed by one auto-resume loop
        ErrorHandlerAutoresumeRetryCount => "error.handler.autoresume.retry.count",
        /// Uncompressed blob size
        BlobDbBlobSize => "blobdb.blob.size",
    }
);

/// Summary of one histogram
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct HistogramData {
    /// Number of samples
    pub count: u64,

    /// Sum of all samples
    pub sum: u64,

    /// Smallest sample (0 if empty)
    pub min: u64,

    /// Largest sample
    pub max: u64,
}

#[derive(Debug)]
struct HistogramStat {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Default for HistogramStat {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }
}

/// Thread-safe ticker and histogram sink
///
/// Usually shared as `Arc<Statistics>` between caches, blob builders
/// and the error handler.
#[derive(Debug)]
pub struct Statistics {
    tickers: Vec<AtomicU64>,
    histograms: Vec<HistogramStat>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            tickers: Ticker::ALL.iter().map(|_| AtomicU64::default()).collect(),
            histograms: Histogram::ALL
                .iter()
                .map(|_| HistogramStat::default())
                .collect(),
        }
    }
}

impl Statistics {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// Adds `count` to a ticker.
    pub fn record_tick(&self, ticker: Ticker, count: u64) {
        if let Some(t) = self.tickers.get(ticker as usize) {
            t.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Returns the current value of a ticker.
    #[must_use]
    pub fn ticker(&self, ticker: Ticker) -> u64 {
        self.tickers
            .get(ticker as usize)
            .map_or(0, |t| t.load(Ordering::Relaxed))
    }

    /// Records a histogram sample.
    pub fn record_in_histogram(&self, histogram: Histogram, value: u64) {
        if let Some(h) = self.histograms.get(histogram as usize) {
            h.count.fetch_add(1, Ordering::Relaxed);
            h.sum.fetch_add(value, Ordering::Relaxed);
            h.min.fetch_min(value, Ordering::Relaxed);
            h.max.fetch_max(value, Ordering::Relaxed);
        }
    }

    /// Returns a summary of a histogram.
    #[must_use]
    pub fn histogram(&self, histogram: Histogram) -> HistogramData {
        let Some(h) = self.histograms.get(histogram as usize) else {
            return HistogramData::default();
        };

        let count = h.count.load(Ordering::Relaxed);

        HistogramData {
            count,
            sum: h.sum.load(Ordering::Relaxed),
            min: if count == 0 {
                0
            } else {
                h.min.load(Ordering::Relaxed)
            },
            max: h.max.load(Ordering::Relaxed),
        }
    }
}

/// Adds to a ticker if a sink is configured.
pub(crate) fn record_tick(stats: Option<&Arc<Statistics>>, ticker: Ticker, count: u64) {
    if let Some(stats) = stats {
        stats.record_tick(ticker, count);
    }
}

/// Records a histogram sample if a sink is configured.
pub(crate) fn record_in_histogram(
    stats: Option<&Arc<Statistics>>,
    histogram: Histogram,
    value: u64,
) {
    if let Some(stats) = stats {
        stats.record_in_histogram(histogram, value);
    }
}
