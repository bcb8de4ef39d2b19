// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{read_length_prefixed, write_length_prefixed, Decode, DecodeError, Encode, EncodeError},
    id::BlobFileNumber,
};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

const CONTEXT: &str = "BlobFileAddition";

/// Custom field tag terminating the custom fields section
const END_MARKER: u32 = 1;

/// Custom field tags with this bit set must be understood by the decoder
const FORWARD_INCOMPATIBLE_MASK: u32 = 1 << 6;

/// Manifest record describing a finished blob file
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BlobFileAddition {
    /// Blob file number
    pub blob_file_number: BlobFileNumber,

    /// Number of blobs in the file
    pub total_blob_count: u64,

    /// Size of all records (header, key and value)
    pub total_blob_bytes: u64,

    /// File checksum method, empty if none
    pub checksum_method: String,

    /// File checksum value, empty if none
    pub checksum_value: Vec<u8>,
}

fn truncated(field: &'static str) -> impl Fn(std::io::Error) -> DecodeError {
    move |_| DecodeError::Truncated((CONTEXT, field))
}

impl BlobFileAddition {
    /// Creates a new blob file addition.
    ///
    /// # Panics
    ///
    /// Panics if only one of the checksum fields is set.
    #[must_use]
    pub fn new(
        blob_file_number: BlobFileNumber,
        total_blob_count: u64,
        total_blob_bytes: u64,
        checksum_method: String,
        checksum_value: Vec<u8>,
    ) -> Self {
        assert_eq!(
            checksum_method.is_empty(),
            checksum_value.is_empty(),
            "checksum method and value must be set together"
        );

        Self {
            blob_file_number,
            total_blob_count,
            total_blob_bytes,
            checksum_method,
            checksum_value,
        }
    }

    /// Decodes a blob file addition, advancing `bytes` past it.
    ///
    /// Decoding stops at the end marker or at the end of the buffer.
    /// Unknown custom fields are skipped unless marked forward
    /// incompatible.
    ///
    /// # Errors
    ///
    /// Will return `Err` naming the field that could not be decoded.
    pub fn decode_from_slice(bytes: &mut &[u8]) -> Result<Self, DecodeError> {
        let blob_file_number = bytes
            .read_u64_varint()
            .map_err(truncated("blob file number"))?;

        let total_blob_count = bytes
            .read_u64_varint()
            .map_err(truncated("total blob count"))?;

        let total_blob_bytes = bytes
            .read_u64_varint()
            .map_err(truncated("total blob bytes"))?;

        let checksum_method = read_length_prefixed(bytes)
            .map_err(truncated("checksum method"))
            .and_then(|raw| {
                String::from_utf8(raw).map_err(|_| DecodeError::Truncated((CONTEXT, "checksum method")))
            })?;

        let checksum_value = read_length_prefixed(bytes).map_err(truncated("checksum value"))?;

        while !bytes.is_empty() {
            let tag = bytes
                .read_u32_varint()
                .map_err(truncated("custom field tag"))?;

            if tag == END_MARKER {
                break;
            }

            if tag & FORWARD_INCOMPATIBLE_MASK != 0 {
                return Err(DecodeError::ForwardIncompatible((CONTEXT, tag)));
            }

            let value = read_length_prefixed(bytes).map_err(truncated("custom field value"))?;
            log::trace!("{CONTEXT}: skipping custom field {tag} ({} bytes)", value.len());
        }

        Ok(Self {
            blob_file_number,
            total_blob_count,
            total_blob_bytes,
            checksum_method,
            checksum_value,
        })
    }
}

impl Encode for BlobFileAddition {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64_varint(self.blob_file_number)?;
        writer.write_u64_varint(self.total_blob_count)?;
        writer.write_u64_varint(self.total_blob_bytes)?;
        write_length_prefixed(writer, self.checksum_method.as_bytes())?;
        write_length_prefixed(writer, &self.checksum_value)?;

        // No custom fields are written yet
        writer.write_u32_varint(END_MARKER)?;

        Ok(())
    }
}

impl Decode for BlobFileAddition {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut bytes = vec![];
        reader.read_to_end(&mut bytes)?;
        Self::decode_from_slice(&mut &bytes[..])
    }
}

impl std::fmt::Display for BlobFileAddition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "blob_file_number: {} total_blob_count: {} total_blob_bytes: {} checksum_method: {}",
            self.blob_file_number, self.total_blob_count, self.total_blob_bytes, self.checksum_method
        )?;

        if !self.checksum_value.is_empty() {
            write!(f, " checksum_value: ")?;
            for byte in &self.checksum_value {
                write!(f, "{byte:02X}")?;
            }
        }

        Ok(())
    }
}
