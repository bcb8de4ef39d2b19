// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Error;

/// Background operation that failed
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum BackgroundErrorReason {
    /// Memtable flush
    Flush,

    /// Compaction
    Compaction,

    /// Write callback
    WriteCallback,

    /// Memtable insert
    MemTable,

    /// Manifest write
    ManifestWrite,

    /// Memtable flush, with the WAL disabled
    FlushNoWal,

    /// Manifest write, with the WAL disabled
    ManifestWriteNoWal,
}

impl std::fmt::Display for BackgroundErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Flush => "flush",
                Self::Compaction => "compaction",
                Self::WriteCallback => "write callback",
                Self::MemTable => "memtable",
                Self::ManifestWrite => "manifest write",
                Self::FlushNoWal => "flush (no WAL)",
                Self::ManifestWriteNoWal => "manifest write (no WAL)",
            }
        )
    }
}

/// Outcome of an error recovery attempt
#[derive(Clone, Debug)]
pub struct RecoveryInfo {
    /// Background error that recovery started from
    pub old_bg_error: Option<Error>,

    /// `Ok` if recovery succeeded, otherwise why it stopped
    pub new_bg_error: crate::Result<()>,
}

/// Receives background error and recovery events
///
/// Listeners are called with the error handler's state unlocked, so they
/// may query the handler. Events from concurrent background jobs can
/// interleave.
pub trait EventListener: Send + Sync {
    /// Called when a background job fails; the error may be replaced.
    fn on_background_error(&self, _reason: BackgroundErrorReason, _error: &mut Error) {}

    /// Called before automatic recovery starts; setting `auto_recovery`
    /// to `false` vetoes it.
    fn on_error_recovery_begin(
        &self,
        _reason: BackgroundErrorReason,
        _error: &Error,
        _auto_recovery: &mut bool,
    ) {
    }

    /// Called when a recovery attempt ends, successful or not.
    fn on_error_recovery_end(&self, _info: &RecoveryInfo) {}
}
