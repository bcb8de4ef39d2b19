// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::{atomic::AtomicU64, Arc};

/// Blob file number
#[allow(clippy::module_name_repetitions)]
pub type BlobFileNumber = u64;

/// Column family ID stamped into blob file headers
pub type ColumnFamilyId = u32;

/// Shared, monotonically increasing file number source
///
/// Cloning is cheap; all clones hand out numbers from the same counter.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default)]
pub struct IdGenerator(Arc<AtomicU64>);

impl std::ops::Deref for IdGenerator {
    type Target = Arc<AtomicU64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl IdGenerator {
    /// Creates a generator whose first number is `start`.
    #[must_use]
    pub fn new(start: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start)))
    }

    /// Allocates the next file number.
    #[must_use]
    pub fn next(&self) -> BlobFileNumber {
        self.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}
