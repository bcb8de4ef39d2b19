// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::DecodeError;

/// Compression type
///
/// The on-disk tag is a single byte shared with the rest of the engine's
/// file formats.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[allow(clippy::module_name_repetitions)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CompressionType {
    /// No compression
    #[default]
    None,

    /// LZ4 compression (speed-optimized)
    #[cfg(feature = "lz4")]
    Lz4,

    /// Zlib/DEFLATE compression (space-optimized)
    #[cfg(feature = "miniz")]
    Miniz(u8),
}

/// Default DEFLATE level used when decoding a zlib tag from disk
#[cfg(feature = "miniz")]
const DEFAULT_MINIZ_LEVEL: u8 = 6;

impl From<CompressionType> for u8 {
    fn from(val: CompressionType) -> Self {
        match val {
            CompressionType::None => 0,

            #[cfg(feature = "miniz")]
            CompressionType::Miniz(_) => 2,

            #[cfg(feature = "lz4")]
            CompressionType::Lz4 => 4,
        }
    }
}

impl TryFrom<u8> for CompressionType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),

            #[cfg(feature = "miniz")]
            2 => Ok(Self::Miniz(DEFAULT_MINIZ_LEVEL)),

            #[cfg(feature = "lz4")]
            4 => Ok(Self::Lz4),

            tag => Err(DecodeError::InvalidTag(("CompressionType", tag))),
        }
    }
}

impl CompressionType {
    /// Returns `true` if values are stored as-is.
    #[must_use]
    pub fn is_none(self) -> bool {
        self == Self::None
    }

    /// Compresses `bytes`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the codec fails.
    #[allow(clippy::unnecessary_wraps)]
    pub fn compress(self, bytes: &[u8]) -> crate::Result<Vec<u8>> {
        match self {
            Self::None => Ok(bytes.into()),

            #[cfg(feature = "lz4")]
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(bytes)),

            #[cfg(feature = "miniz")]
            Self::Miniz(level) => Ok(miniz_oxide::deflate::compress_to_vec(bytes, level)),
        }
    }

    /// Decompresses `bytes`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the input is not valid for this codec.
    pub fn decompress(self, bytes: &[u8]) -> crate::Result<Vec<u8>> {
        match self {
            Self::None => Ok(bytes.into()),

            #[cfg(feature = "lz4")]
            Self::Lz4 => lz4_flex::decompress_size_prepended(bytes)
                .map_err(|e| crate::Error::Decompress(e.to_string())),

            #[cfg(feature = "miniz")]
            Self::Miniz(_) => miniz_oxide::inflate::decompress_to_vec(bytes)
                .map_err(|e| crate::Error::Decompress(format!("{e:?}"))),
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::None => "no compression",

                #[cfg(feature = "lz4")]
                Self::Lz4 => "lz4",

                #[cfg(feature = "miniz")]
                Self::Miniz(_) => "miniz",
            }
        )
    }
}
