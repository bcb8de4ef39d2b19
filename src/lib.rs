// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Storage kernel building blocks for LSM-tree engines with key-value separation.
//!
//! > This crate is intended as a building block for LSM storage engines.
//!
//! It consists of three loosely coupled parts:
//!
//! - A sharded LRU [block cache](cache::LruCache) with high, low and bottom
//!   priority pools, a pluggable [secondary cache](cache::SecondaryCache)
//!   tier (a [compressed in-memory one](cache::CompressedSecondaryCache) is
//!   provided) and asynchronous lookups.
//! - The [blob log format](blob::format) and its writers and readers. Large
//!   values are written to blob files by a [`BlobFileBuilder`](blob::BlobFileBuilder);
//!   the tree stores a [`BlobIndex`](blob::BlobIndex) instead, and the
//!   manifest a [`BlobFileAddition`](blob::BlobFileAddition) per file.
//! - A background [`ErrorHandler`] that classifies failures of flushes,
//!   compactions and manifest writes by severity, decides when writes must
//!   stop and drives automatic recovery.
//!
//! All file access goes through the [`FileSystem`](fs::FileSystem) trait, so
//! I/O failures arrive classified (retryable, out of space, fenced, ...).

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]
#![deny(clippy::unwrap_used, clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]

pub mod blob;
pub mod cache;
mod checksum;
pub mod coding;
mod compression;
mod config;
mod error;
mod error_handler;
pub mod fs;
mod id;
mod listener;
mod mock;
mod statistics;
mod version;

pub use {
    compression::CompressionType,
    config::{
        BlobFileConfig, CompressedSecondaryCacheConfig, ErrorHandlerConfig, LruCacheConfig,
        PrepopulateBlobCache,
    },
    error::{Code, Error, IoError, IoErrorScope, Result, SubCode},
    error_handler::{
        classify as classify_bg_error, BackgroundError, ErrorHandler, ErrorRecovery, FlushReason,
        RecoverContext, Severity, SpaceManager,
    },
    id::{BlobFileNumber, ColumnFamilyId, IdGenerator},
    listener::{BackgroundErrorReason, EventListener, RecoveryInfo},
    statistics::{Histogram, HistogramData, Statistics, Ticker},
    version::Version,
};

#[doc(hidden)]
pub use mock::{FaultPoint, MockFileSystem};
