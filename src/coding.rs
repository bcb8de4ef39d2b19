// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Binary (de)serialization traits and helpers.

use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// Error during serialization
#[derive(Debug)]
pub enum EncodeError {
    /// I/O error
    Io(std::io::Error),
}

/// Error during deserialization
#[derive(Debug)]
pub enum DecodeError {
    /// I/O error
    Io(std::io::Error),

    /// Invalid enum tag
    InvalidTag((&'static str, u8)),

    /// Input has the wrong size for a fixed-size structure
    InvalidSize(&'static str),

    /// Magic number does not match
    InvalidMagic(&'static str),

    /// Unknown format version
    InvalidVersion(&'static str),

    /// Checksum does not match
    ChecksumMismatch(&'static str),

    /// A field could not be decoded
    Truncated((&'static str, &'static str)),

    /// A field must be understood, but is not
    ForwardIncompatible((&'static str, u32)),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{e}"),
            Self::InvalidTag((ctx, tag)) => write!(f, "{ctx}: Invalid tag {tag}"),
            Self::InvalidSize(ctx) => write!(f, "{ctx}: Unexpected size"),
            Self::InvalidMagic(ctx) => write!(f, "{ctx}: Magic number mismatch"),
            Self::InvalidVersion(ctx) => write!(f, "{ctx}: Unknown version"),
            Self::ChecksumMismatch(ctx) => write!(f, "{ctx}: CRC mismatch"),
            Self::Truncated((ctx, field)) => write!(f, "{ctx}: Error decoding {field}"),
            Self::ForwardIncompatible((ctx, tag)) => {
                write!(f, "{ctx}: Forward incompatible custom field encountered: {tag}")
            }
        }
    }
}

impl From<std::io::Error> for EncodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Trait to serialize stuff
pub trait Encode {
    /// Serializes into writer.
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError>;

    /// Serializes into vector.
    fn encode_into_vec(&self) -> Vec<u8> {
        let mut v = vec![];

        // NOTE: Writing into a Vec cannot fail
        #[allow(clippy::expect_used)]
        self.encode_into(&mut v).expect("cannot fail");

        v
    }
}

/// Trait to deserialize stuff
pub trait Decode {
    /// Deserializes from reader.
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError>
    where
        Self: Sized;
}

/// Writes a length-prefixed byte string.
pub fn write_length_prefixed<W: Write>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_u64_varint(bytes.len() as u64)?;
    writer.write_all(bytes)
}

/// Reads a length-prefixed byte string.
///
/// A prefix that promises more bytes than are available is an `UnexpectedEof`.
pub fn read_length_prefixed<R: Read>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let len = reader.read_u64_varint()?;

    let mut buf = vec![];
    let read = reader.by_ref().take(len).read_to_end(&mut buf)?;

    if read as u64 != len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "length-prefixed slice is truncated",
        ));
    }

    Ok(buf)
}
