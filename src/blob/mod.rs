// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Blob files hold values that are separated from the LSM-tree.
//!
//! A blob file is written once, by a single flush or compaction job, using a
//! [`BlobFileBuilder`]. Every value is appended as a framed record:
//!
//! [header] [record]* [footer]
//!
//! The builder hands back a [`BlobIndex`] per value, to be stored in the
//! tree instead of the value itself, and a [`BlobFileAddition`] per finished
//! file, to be recorded in the manifest.

mod addition;
mod builder;
mod contents;
pub mod format;
mod index;
mod reader;
mod writer;

pub use {
    addition::BlobFileAddition,
    builder::{
        BlobFileBuilder, BlobFileCompletionCallback, BlobFileCompletionInfo,
        BlobFileCreationReason,
    },
    contents::BlobContents,
    index::BlobIndex,
    reader::{BlobFileReader, BlobLogSequentialReader},
    writer::{BlobLogWriter, FILE_CHECKSUM_CRC32C},
};
