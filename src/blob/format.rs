// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Blob log framing: `[header] [record]* [footer]`.
//!
//! All integers are little endian. Every checksum is a masked CRC32C.

use crate::{
    checksum,
    coding::{Decode, DecodeError, Encode, EncodeError},
    id::ColumnFamilyId,
    version::{Version, MAGIC_NUMBER},
    CompressionType,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Expiration range `(first, second)` of the blobs in a file
pub type ExpirationRange = (u64, u64);

/// Size of the encoded file header
pub const HEADER_LEN: usize = 30;

/// Size of the encoded record header (without key and value)
pub const RECORD_HEADER_LEN: usize = 32;

/// Size of the encoded file footer
pub const FOOTER_LEN: usize = 32;

const HAS_TTL_FLAG: u8 = 1;

/// Blob file header
#[derive(Clone, Debug, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub struct BlobLogHeader {
    /// Format version
    pub version: Version,

    /// Column family the blobs belong to
    pub column_family_id: ColumnFamilyId,

    /// Compression applied to every blob in the file
    pub compression: CompressionType,

    /// Whether the blobs carry expirations
    pub has_ttl: bool,

    /// Expiration range of the blobs
    pub expiration_range: ExpirationRange,
}

impl BlobLogHeader {
    /// Creates a header of the current format version.
    #[must_use]
    pub fn new(
        column_family_id: ColumnFamilyId,
        compression: CompressionType,
        has_ttl: bool,
        expiration_range: ExpirationRange,
    ) -> Self {
        Self {
            version: Version::V1,
            column_family_id,
            compression,
            has_ttl,
            expiration_range,
        }
    }

    /// Decodes a header from exactly [`HEADER_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Will return `Err` on a size, magic number or version mismatch,
    /// or an unknown compression type.
    pub fn decode_from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != HEADER_LEN {
            return Err(DecodeError::InvalidSize("blob log header"));
        }

        let mut reader = bytes;

        let version = match Version::read_prefix(&mut reader)? {
            None => return Err(DecodeError::InvalidMagic("blob log header")),
            Some(Err(_)) => return Err(DecodeError::InvalidVersion("blob log header")),
            Some(Ok(version)) => version,
        };

        let column_family_id = reader.read_u32::<LittleEndian>()?;
        let flags = reader.read_u8()?;
        let compression = CompressionType::try_from(reader.read_u8()?)?;
        let first = reader.read_u64::<LittleEndian>()?;
        let second = reader.read_u64::<LittleEndian>()?;

        Ok(Self {
            version,
            column_family_id,
            compression,
            has_ttl: flags & HAS_TTL_FLAG == HAS_TTL_FLAG,
            expiration_range: (first, second),
        })
    }
}

impl Encode for BlobLogHeader {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        self.version.write_prefix(writer)?;
        writer.write_u32::<LittleEndian>(self.column_family_id)?;
        writer.write_u8(if self.has_ttl { HAS_TTL_FLAG } else { 0 })?;
        writer.write_u8(self.compression.into())?;
        writer.write_u64::<LittleEndian>(self.expiration_range.0)?;
        writer.write_u64::<LittleEndian>(self.expiration_range.1)?;
        Ok(())
    }
}

impl Decode for BlobLogHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut buf = [0; HEADER_LEN];
        reader.read_exact(&mut buf)?;
        Self::decode_from_slice(&buf)
    }
}

/// Blob file footer
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub struct BlobLogFooter {
    /// Number of records in the file
    pub blob_count: u64,

    /// Expiration range of the blobs
    pub expiration_range: ExpirationRange,
}

impl BlobLogFooter {
    /// Decodes a footer from exactly [`FOOTER_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Will return `Err` on a size, magic number or checksum mismatch.
    pub fn decode_from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != FOOTER_LEN {
            return Err(DecodeError::InvalidSize("blob log footer"));
        }

        let (content, _) = bytes.split_at(FOOTER_LEN - std::mem::size_of::<u32>());
        let expected_crc = checksum::mask(checksum::value(content));

        let mut reader = bytes;

        let magic = reader.read_u32::<LittleEndian>()?;
        let blob_count = reader.read_u64::<LittleEndian>()?;
        let first = reader.read_u64::<LittleEndian>()?;
        let second = reader.read_u64::<LittleEndian>()?;
        let crc = reader.read_u32::<LittleEndian>()?;

        if magic != MAGIC_NUMBER {
            return Err(DecodeError::InvalidMagic("blob log footer"));
        }

        if crc != expected_crc {
            return Err(DecodeError::ChecksumMismatch("blob log footer"));
        }

        Ok(Self {
            blob_count,
            expiration_range: (first, second),
        })
    }
}

impl Encode for BlobLogFooter {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let mut buf = Vec::with_capacity(FOOTER_LEN);
        buf.write_u32::<LittleEndian>(MAGIC_NUMBER)?;
        buf.write_u64::<LittleEndian>(self.blob_count)?;
        buf.write_u64::<LittleEndian>(self.expiration_range.0)?;
        buf.write_u64::<LittleEndian>(self.expiration_range.1)?;

        let crc = checksum::mask(checksum::value(&buf));
        buf.write_u32::<LittleEndian>(crc)?;

        writer.write_all(&buf)?;
        Ok(())
    }
}

impl Decode for BlobLogFooter {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut buf = [0; FOOTER_LEN];
        reader.read_exact(&mut buf)?;
        Self::decode_from_slice(&buf)
    }
}

/// A single blob record
///
/// The header checksum is verified when decoding; the blob checksum (over
/// key and value) only by [`BlobLogRecord::check_blob_crc`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub struct BlobLogRecord {
    /// User key
    pub key: Vec<u8>,

    /// Value, as stored (possibly compressed)
    pub value: Vec<u8>,

    /// Expiration timestamp, 0 if none
    pub expiration: u64,

    /// Key length, as stated by the header
    pub key_size: u64,

    /// Value length, as stated by the header
    pub value_size: u64,

    /// Masked CRC over the size and expiration fields
    pub header_crc: u32,

    /// Masked CRC over key and value
    pub blob_crc: u32,
}

fn blob_crc(key: &[u8], value: &[u8]) -> u32 {
    checksum::mask(checksum::extend(checksum::value(key), value))
}

impl BlobLogRecord {
    /// Creates a record, computing both checksums.
    #[must_use]
    pub fn new(key: Vec<u8>, value: Vec<u8>, expiration: u64) -> Self {
        let mut record = Self {
            key_size: key.len() as u64,
            value_size: value.len() as u64,
            blob_crc: blob_crc(&key, &value),
            key,
            value,
            expiration,
            header_crc: 0,
        };
        record.header_crc = checksum::mask(checksum::value(&record.size_fields()));
        record
    }

    fn size_fields(&self) -> [u8; 24] {
        let mut buf = [0; 24];
        let (key_size, rest) = buf.split_at_mut(8);
        let (value_size, expiration) = rest.split_at_mut(8);
        key_size.copy_from_slice(&self.key_size.to_le_bytes());
        value_size.copy_from_slice(&self.value_size.to_le_bytes());
        expiration.copy_from_slice(&self.expiration.to_le_bytes());
        buf
    }

    /// Encodes the record header for the given key and value.
    #[must_use]
    pub fn encode_header(key: &[u8], value: &[u8], expiration: u64) -> [u8; RECORD_HEADER_LEN] {
        let mut buf = [0; RECORD_HEADER_LEN];
        let (fields, crcs) = buf.split_at_mut(24);

        let record = Self {
            key_size: key.len() as u64,
            value_size: value.len() as u64,
            expiration,
            ..Default::default()
        };
        fields.copy_from_slice(&record.size_fields());

        let (header_crc, value_crc) = crcs.split_at_mut(4);
        header_crc.copy_from_slice(&checksum::mask(checksum::value(fields)).to_le_bytes());
        value_crc.copy_from_slice(&blob_crc(key, value).to_le_bytes());

        buf
    }

    /// Decodes a record header from exactly [`RECORD_HEADER_LEN`] bytes.
    ///
    /// Key and value are left empty.
    ///
    /// # Errors
    ///
    /// Will return `Err` on a size or header checksum mismatch.
    pub fn decode_header(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != RECORD_HEADER_LEN {
            return Err(DecodeError::InvalidSize("blob record header"));
        }

        let (fields, _) = bytes.split_at(24);
        let expected_crc = checksum::mask(checksum::value(fields));

        let mut reader = bytes;
        let key_size = reader.read_u64::<LittleEndian>()?;
        let value_size = reader.read_u64::<LittleEndian>()?;
        let expiration = reader.read_u64::<LittleEndian>()?;
        let header_crc = reader.read_u32::<LittleEndian>()?;
        let blob_crc = reader.read_u32::<LittleEndian>()?;

        if header_crc != expected_crc {
            return Err(DecodeError::ChecksumMismatch("blob record header"));
        }

        Ok(Self {
            key: vec![],
            value: vec![],
            expiration,
            key_size,
            value_size,
            header_crc,
            blob_crc,
        })
    }

    /// Verifies the blob checksum against the key and value read.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` on a mismatch.
    pub fn check_blob_crc(&self) -> crate::Result<()> {
        if blob_crc(&self.key, &self.value) != self.blob_crc {
            return Err(crate::Error::Corruption("Blob CRC mismatch".into()));
        }
        Ok(())
    }

    /// Encoded size of the record, including the header.
    #[must_use]
    pub fn record_size(&self) -> u64 {
        RECORD_HEADER_LEN as u64 + self.key_size + self.value_size
    }
}

impl Encode for BlobLogRecord {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_all(&Self::encode_header(&self.key, &self.value, self.expiration))?;
        writer.write_all(&self.key)?;
        writer.write_all(&self.value)?;
        Ok(())
    }
}

impl Decode for BlobLogRecord {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut header = [0; RECORD_HEADER_LEN];
        reader.read_exact(&mut header)?;

        let mut record = Self::decode_header(&header)?;

        record.key = read_exact_vec(reader, record.key_size)?;
        record.value = read_exact_vec(reader, record.value_size)?;

        Ok(record)
    }
}

/// Reads exactly `len` bytes without trusting `len` for the allocation.
pub(crate) fn read_exact_vec<R: Read>(reader: &mut R, len: u64) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![];
    let read = reader.by_ref().take(len).read_to_end(&mut buf)?;

    if read as u64 != len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "blob record is truncated",
        ));
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn blob_log_header_layout() -> crate::Result<()> {
        let header = BlobLogHeader::new(3, CompressionType::None, true, (10, 20));
        let bytes = header.encode_into_vec();
        assert_eq!(HEADER_LEN, bytes.len());
        assert_eq!(&[0x37, 0x8f, 0x24, 0x00, 1, 0, 0, 0, 3, 0, 0, 0, 1, 0], &bytes[..14]);

        assert_eq!(header, BlobLogHeader::decode_from(&mut &bytes[..])?);

        Ok(())
    }

    #[test]
    fn blob_log_header_errors() {
        let bytes = BlobLogHeader::new(0, CompressionType::None, false, (0, 0)).encode_into_vec();

        assert!(matches!(
            BlobLogHeader::decode_from_slice(&bytes[1..]),
            Err(DecodeError::InvalidSize(_))
        ));

        let mut bad_magic = bytes.clone();
        bad_magic[0] ^= 1;
        assert!(matches!(
            BlobLogHeader::decode_from_slice(&bad_magic),
            Err(DecodeError::InvalidMagic(_))
        ));

        let mut bad_version = bytes.clone();
        bad_version[4] = 2;
        assert!(matches!(
            BlobLogHeader::decode_from_slice(&bad_version),
            Err(DecodeError::InvalidVersion(_))
        ));

        let mut bad_compression = bytes;
        bad_compression[13] = 0xee;
        assert!(matches!(
            BlobLogHeader::decode_from_slice(&bad_compression),
            Err(DecodeError::InvalidTag(("CompressionType", 0xee)))
        ));
    }

    #[test]
    fn blob_log_footer_crc() -> crate::Result<()> {
        let footer = BlobLogFooter {
            blob_count: 42,
            expiration_range: (1, 2),
        };
        let bytes = footer.encode_into_vec();
        assert_eq!(FOOTER_LEN, bytes.len());
        assert_eq!(footer, BlobLogFooter::decode_from_slice(&bytes)?);

        for idx in 4..FOOTER_LEN {
            let mut corrupted = bytes.clone();
            corrupted[idx] ^= 0x10;
            assert!(
                matches!(
                    BlobLogFooter::decode_from_slice(&corrupted),
                    Err(DecodeError::ChecksumMismatch(_))
                ),
                "byte {idx} should be covered"
            );
        }

        Ok(())
    }

    #[test]
    fn blob_log_record_crc() -> crate::Result<()> {
        let record = BlobLogRecord::new(b"key".to_vec(), b"value".to_vec(), 0);
        let bytes = record.encode_into_vec();
        assert_eq!(record.record_size(), bytes.len() as u64);

        let decoded = BlobLogRecord::decode_from(&mut &bytes[..])?;
        assert_eq!(record, decoded);
        decoded.check_blob_crc()?;

        // Header corruption is caught eagerly
        for idx in 0..RECORD_HEADER_LEN - 8 {
            let mut corrupted = bytes.clone();
            corrupted[idx] ^= 0x01;
            assert!(BlobLogRecord::decode_header(&corrupted[..RECORD_HEADER_LEN]).is_err());
        }

        // Blob corruption only on demand
        let mut corrupted = bytes.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0x01;
        let decoded = BlobLogRecord::decode_from(&mut &corrupted[..])?;
        assert!(matches!(
            decoded.check_blob_crc(),
            Err(crate::Error::Corruption(_))
        ));

        Ok(())
    }

    #[test]
    fn blob_log_record_truncated() {
        let bytes = BlobLogRecord::new(b"key".to_vec(), b"value".to_vec(), 0).encode_into_vec();
        assert!(BlobLogRecord::decode_from(&mut &bytes[..bytes.len() - 1]).is_err());
    }
}
