// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    version::Version,
};

/// Coarse classification of an error, used by the background error
/// severity tables
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Code {
    /// Lookup miss
    NotFound,

    /// Checksum, magic or format violation
    Corruption,

    /// Optional capability is absent
    NotSupported,

    /// Caller misuse
    InvalidArgument,

    /// I/O failure
    IoError,

    /// Shutdown is in progress
    ShutdownInProgress,

    /// Operation aborted
    Aborted,

    /// Resource busy
    Busy,

    /// Memory/capacity limit reached
    MemoryLimit,

    /// Compression or decompression failed
    Compression,
}

/// Finer classification of an error
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SubCode {
    /// No further classification
    #[default]
    None,

    /// No space left on device
    NoSpace,

    /// Space limit reached
    SpaceLimit,

    /// Another instance has taken ownership of the storage
    IoFenced,

    /// No such file or directory
    PathNotFound,

    /// Memory limit reached
    MemoryLimit,
}

/// Whether an I/O failure is believed to be confined to one file
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum IoErrorScope {
    /// Whole file system or mount
    #[default]
    FileSystem,

    /// A single file
    File,

    /// A byte range of a file
    Range,
}

/// A classified I/O failure
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IoError {
    /// I/O error flavor
    pub subcode: SubCode,

    /// Re-attempting the same operation may succeed
    pub retryable: bool,

    /// Data is known to be lost
    pub data_loss: bool,

    /// Blast radius of the failure
    pub scope: IoErrorScope,

    /// Human readable description
    pub message: String,
}

impl IoError {
    /// Creates a generic, non-retryable, filesystem-scoped I/O error.
    #[must_use]
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            subcode: SubCode::None,
            retryable: false,
            data_loss: false,
            scope: IoErrorScope::FileSystem,
            message: message.into(),
        }
    }

    /// Creates a "no space left on device" error.
    #[must_use]
    pub fn no_space<S: Into<String>>(message: S) -> Self {
        Self::new(message).with_subcode(SubCode::NoSpace)
    }

    /// Creates a "space limit reached" error.
    #[must_use]
    pub fn space_limit<S: Into<String>>(message: S) -> Self {
        Self::new(message).with_subcode(SubCode::SpaceLimit)
    }

    /// Creates an "I/O fenced" error.
    #[must_use]
    pub fn fenced<S: Into<String>>(message: S) -> Self {
        Self::new(message).with_subcode(SubCode::IoFenced)
    }

    /// Creates a "path not found" error.
    #[must_use]
    pub fn path_not_found<S: Into<String>>(message: S) -> Self {
        Self::new(message).with_subcode(SubCode::PathNotFound)
    }

    /// Sets the subcode.
    #[must_use]
    pub fn with_subcode(mut self, subcode: SubCode) -> Self {
        self.subcode = subcode;
        self
    }

    /// Marks the error as retryable.
    #[must_use]
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Marks the error as having lost data.
    #[must_use]
    pub fn data_loss(mut self, data_loss: bool) -> Self {
        self.data_loss = data_loss;
        self
    }

    /// Sets the error scope.
    #[must_use]
    pub fn scope(mut self, scope: IoErrorScope) -> Self {
        self.scope = scope;
        self
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;

        match self.subcode {
            SubCode::NoSpace => write!(f, ": No space left on device")?,
            SubCode::SpaceLimit => write!(f, ": Space limit reached")?,
            SubCode::IoFenced => write!(f, ": IO fenced off")?,
            SubCode::PathNotFound => write!(f, ": No such file or directory")?,
            SubCode::MemoryLimit => write!(f, ": Memory limit reached")?,
            SubCode::None => {}
        }

        if self.retryable {
            write!(f, " (retryable)")?;
        }
        if self.data_loss {
            write!(f, " (data loss)")?;
        }

        Ok(())
    }
}

impl From<std::io::Error> for IoError {
    fn from(value: std::io::Error) -> Self {
        // ENOSPC
        const NO_SPACE_OS_ERROR: i32 = 28;

        let subcode = if value.kind() == std::io::ErrorKind::NotFound {
            SubCode::PathNotFound
        } else if value.raw_os_error() == Some(NO_SPACE_OS_ERROR) {
            SubCode::NoSpace
        } else {
            SubCode::None
        };

        Self::new(value.to_string()).with_subcode(subcode)
    }
}

/// Represents errors that can occur in the storage kernel
#[derive(Clone, Debug)]
pub enum Error {
    /// Classified I/O error
    Io(IoError),

    /// Checksum, magic number or format violation
    Corruption(String),

    /// Caller misuse, rejected before any I/O
    InvalidArgument(String),

    /// Insert would exceed a strict capacity limit
    MemoryLimit,

    /// Optional capability is absent
    NotSupported(String),

    /// Another operation is already in progress
    Busy,

    /// The owning instance is shutting down
    ShutdownInProgress,

    /// Operation gave up
    Aborted(String),

    /// Invalid data format version
    InvalidVersion(Option<Version>),

    /// Compression failed
    Compress(String),

    /// Decompression failed
    Decompress(String),
}

impl Error {
    /// Returns the coarse error classification.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::Io(_) => Code::IoError,
            Self::Corruption(_) | Self::InvalidVersion(_) => Code::Corruption,
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::MemoryLimit => Code::MemoryLimit,
            Self::NotSupported(_) => Code::NotSupported,
            Self::Busy => Code::Busy,
            Self::ShutdownInProgress => Code::ShutdownInProgress,
            Self::Aborted(_) => Code::Aborted,
            Self::Compress(_) | Self::Decompress(_) => Code::Compression,
        }
    }

    /// Returns the fine error classification.
    #[must_use]
    pub fn subcode(&self) -> SubCode {
        match self {
            Self::Io(e) => e.subcode,
            Self::MemoryLimit => SubCode::MemoryLimit,
            _ => SubCode::None,
        }
    }

    /// Returns the I/O classification, if this is an I/O error.
    #[must_use]
    pub fn as_io(&self) -> Option<&IoError> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` if this is a corruption error.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        self.code() == Code::Corruption
    }

    /// Returns `true` if the I/O layer flagged this error as retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.as_io().is_some_and(|e| e.retryable)
    }

    pub(crate) fn corruption<S: Into<String>>(context: &str, detail: S) -> Self {
        Self::Corruption(format!("{context}: {}", detail.into()))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Corruption(msg) => write!(f, "Corruption: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            Self::MemoryLimit => write!(f, "Memory limit reached"),
            Self::NotSupported(msg) => write!(f, "Not implemented: {msg}"),
            Self::Busy => write!(f, "Resource busy"),
            Self::ShutdownInProgress => write!(f, "Shutdown in progress"),
            Self::Aborted(msg) => write!(f, "Operation aborted: {msg}"),
            Self::InvalidVersion(v) => write!(f, "Invalid version: {v:?}"),
            Self::Compress(msg) => write!(f, "Compression failed: {msg}"),
            Self::Decompress(msg) => write!(f, "Decompression failed: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.into())
    }
}

impl From<IoError> for Error {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        match value {
            EncodeError::Io(e) => Self::from(e),
        }
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        match value {
            DecodeError::Io(e) => Self::from(e),
            other => Self::Corruption(other.to_string()),
        }
    }
}

/// Storage kernel result
pub type Result<T> = std::result::Result<T, Error>;
