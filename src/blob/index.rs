// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    id::BlobFileNumber,
    CompressionType,
};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

const TAG_INLINED_TTL: u8 = 0;
const TAG_BLOB: u8 = 1;
const TAG_BLOB_TTL: u8 = 2;

/// Reference to a value stored in the LSM-tree in place of the value
///
/// Like a value handle, it is resolved by reading the blob file at the
/// given offset.
#[derive(Clone, Debug, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum BlobIndex {
    /// Small value with an expiration, kept inline
    InlinedTtl {
        /// Expiration timestamp
        expiration: u64,

        /// Raw value
        value: Vec<u8>,
    },

    /// Value stored in a blob file
    Blob {
        /// Blob file number
        file_number: BlobFileNumber,

        /// Offset of the (possibly compressed) value in the file
        offset: u64,

        /// Stored size of the value
        size: u64,

        /// Compression applied to the value
        compression: CompressionType,
    },

    /// Value with an expiration, stored in a blob file
    BlobTtl {
        /// Expiration timestamp
        expiration: u64,

        /// Blob file number
        file_number: BlobFileNumber,

        /// Offset of the (possibly compressed) value in the file
        offset: u64,

        /// Stored size of the value
        size: u64,

        /// Compression applied to the value
        compression: CompressionType,
    },
}

impl BlobIndex {
    /// Returns `true` if the value is kept inline.
    #[must_use]
    pub fn is_inlined(&self) -> bool {
        matches!(self, Self::InlinedTtl { .. })
    }

    /// Returns the expiration, if any.
    #[must_use]
    pub fn expiration(&self) -> Option<u64> {
        match self {
            Self::InlinedTtl { expiration, .. } | Self::BlobTtl { expiration, .. } => {
                Some(*expiration)
            }
            Self::Blob { .. } => None,
        }
    }

    /// Returns the blob file number, unless the value is inlined.
    #[must_use]
    pub fn file_number(&self) -> Option<BlobFileNumber> {
        match self {
            Self::Blob { file_number, .. } | Self::BlobTtl { file_number, .. } => {
                Some(*file_number)
            }
            Self::InlinedTtl { .. } => None,
        }
    }

    /// Decodes a blob index that spans all of `bytes`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the encoding is invalid or followed by garbage.
    pub fn decode_from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = bytes;
        let index = Self::decode_from(&mut reader)?;

        if index.is_inlined() || reader.is_empty() {
            Ok(index)
        } else {
            Err(DecodeError::InvalidSize("blob index"))
        }
    }
}

fn truncated(field: &'static str) -> impl Fn(std::io::Error) -> DecodeError {
    move |_| DecodeError::Truncated(("blob index", field))
}

impl Encode for BlobIndex {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        match self {
            Self::InlinedTtl { expiration, value } => {
                writer.write_u8(TAG_INLINED_TTL)?;
                writer.write_u64_varint(*expiration)?;
                writer.write_all(value)?;
            }
            Self::Blob {
                file_number,
                offset,
                size,
                compression,
            } => {
                writer.write_u8(TAG_BLOB)?;
                writer.write_u64_varint(*file_number)?;
                writer.write_u64_varint(*offset)?;
                writer.write_u64_varint(*size)?;
                writer.write_u8((*compression).into())?;
            }
            Self::BlobTtl {
                expiration,
                file_number,
                offset,
                size,
                compression,
            } => {
                writer.write_u8(TAG_BLOB_TTL)?;
                writer.write_u64_varint(*expiration)?;
                writer.write_u64_varint(*file_number)?;
                writer.write_u64_varint(*offset)?;
                writer.write_u64_varint(*size)?;
                writer.write_u8((*compression).into())?;
            }
        }

        Ok(())
    }
}

impl Decode for BlobIndex {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8().map_err(truncated("type"))?;

        match tag {
            TAG_INLINED_TTL => {
                let expiration = reader.read_u64_varint().map_err(truncated("expiration"))?;

                let mut value = vec![];
                reader.read_to_end(&mut value)?;

                Ok(Self::InlinedTtl { expiration, value })
            }
            TAG_BLOB | TAG_BLOB_TTL => {
                let expiration = if tag == TAG_BLOB_TTL {
                    Some(reader.read_u64_varint().map_err(truncated("expiration"))?)
                } else {
                    None
                };

                let file_number = reader.read_u64_varint().map_err(truncated("file number"))?;
                let offset = reader.read_u64_varint().map_err(truncated("offset"))?;
                let size = reader.read_u64_varint().map_err(truncated("size"))?;
                let compression =
                    CompressionType::try_from(reader.read_u8().map_err(truncated("compression"))?)?;

                Ok(match expiration {
                    Some(expiration) => Self::BlobTtl {
                        expiration,
                        file_number,
                        offset,
                        size,
                        compression,
                    },
                    None => Self::Blob {
                        file_number,
                        offset,
                        size,
                        compression,
                    },
                })
            }
            tag => Err(DecodeError::InvalidTag(("BlobIndex", tag))),
        }
    }
}

impl std::fmt::Display for BlobIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InlinedTtl { expiration, value } => {
                write!(f, "[inlined blob] value size: {} exp: {expiration}", value.len())
            }
            Self::Blob {
                file_number,
                offset,
                size,
                compression,
            } => write!(
                f,
                "[blob ref] file: {file_number} offset: {offset} size: {size} compression: {compression}"
            ),
            Self::BlobTtl {
                expiration,
                file_number,
                offset,
                size,
                compression,
            } => write!(
                f,
                "[blob ref] file: {file_number} offset: {offset} size: {size} compression: {compression} exp: {expiration}"
            ),
        }
    }
}
