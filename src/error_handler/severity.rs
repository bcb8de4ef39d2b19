// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{listener::BackgroundErrorReason, Code, SubCode};

/// How bad a background error is
///
/// Ordered from harmless to terminal.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Severity {
    /// Error is ignored
    #[default]
    NoError,

    /// Writes continue, background work may pause
    SoftError,

    /// Writes stop until recovered
    HardError,

    /// Only a manual reopen recovers
    FatalError,

    /// Data may be lost, cannot be recovered
    UnrecoverableError,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::NoError => "no error",
                Self::SoftError => "soft error",
                Self::HardError => "hard error",
                Self::FatalError => "fatal error",
                Self::UnrecoverableError => "unrecoverable error",
            }
        )
    }
}

/// Rules keyed by reason, code and subcode
fn by_subcode(
    reason: BackgroundErrorReason,
    code: Code,
    subcode: SubCode,
    paranoid: bool,
) -> Option<Severity> {
    use BackgroundErrorReason as R;
    use Severity as S;

    if code != Code::IoError {
        return None;
    }

    match (reason, subcode, paranoid) {
        (_, SubCode::IoFenced, _) => Some(S::FatalError),

        (R::Compaction, SubCode::NoSpace, true) => Some(S::SoftError),
        (R::Compaction, SubCode::NoSpace, false) => Some(S::NoError),
        (R::Compaction, SubCode::SpaceLimit, true) => Some(S::HardError),

        (R::Flush | R::FlushNoWal, SubCode::NoSpace, true) => Some(S::HardError),
        (R::Flush | R::FlushNoWal, SubCode::NoSpace, false) => Some(S::NoError),
        (R::Flush | R::FlushNoWal, SubCode::SpaceLimit, true) => Some(S::HardError),

        (R::WriteCallback | R::ManifestWrite | R::ManifestWriteNoWal, SubCode::NoSpace, _) => {
            Some(S::HardError)
        }

        _ => None,
    }
}

/// Rules keyed by reason and code
fn by_code(reason: BackgroundErrorReason, code: Code, paranoid: bool) -> Option<Severity> {
    use BackgroundErrorReason as R;
    use Severity as S;

    match (reason, code, paranoid) {
        (
            R::Compaction | R::Flush | R::FlushNoWal | R::WriteCallback,
            Code::Corruption,
            true,
        ) => Some(S::UnrecoverableError),
        (
            R::Compaction | R::Flush | R::FlushNoWal | R::WriteCallback,
            Code::Corruption | Code::IoError,
            false,
        ) => Some(S::NoError),
        (R::Compaction | R::Flush | R::FlushNoWal | R::WriteCallback, Code::IoError, true) => {
            Some(S::FatalError)
        }

        (R::ManifestWrite | R::ManifestWriteNoWal, Code::IoError, _) => Some(S::FatalError),

        _ => None,
    }
}

/// Rules keyed by reason only
fn by_reason(reason: BackgroundErrorReason, paranoid: bool) -> Option<Severity> {
    use BackgroundErrorReason as R;
    use Severity as S;

    match (reason, paranoid) {
        (R::Compaction | R::Flush, true) | (R::WriteCallback | R::MemTable, _) => {
            Some(S::FatalError)
        }
        (R::Compaction | R::Flush, false) => Some(S::NoError),
        _ => None,
    }
}

/// Classifies a background error.
///
/// The most specific matching rule wins; anything unmatched is fatal.
#[must_use]
pub fn classify(
    reason: BackgroundErrorReason,
    code: Code,
    subcode: SubCode,
    paranoid: bool,
) -> Severity {
    by_subcode(reason, code, subcode, paranoid)
        .or_else(|| by_code(reason, code, paranoid))
        .or_else(|| by_reason(reason, paranoid))
        .unwrap_or(Severity::FatalError)
}
