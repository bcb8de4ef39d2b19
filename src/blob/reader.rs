// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::format::{
    BlobLogFooter, BlobLogHeader, BlobLogRecord, FOOTER_LEN, HEADER_LEN, RECORD_HEADER_LEN,
};
use crate::{
    fs::{FileSystem, RandomAccessFile},
    id::BlobFileNumber,
    CompressionType,
};
use std::path::Path;

/// Reads a blob file front to back
///
/// Record header checksums are verified while reading; blob checksums
/// are left to [`BlobLogRecord::check_blob_crc`].
#[allow(clippy::module_name_repetitions)]
pub struct BlobLogSequentialReader {
    file: Box<dyn RandomAccessFile>,
    offset: u64,
}

impl BlobLogSequentialReader {
    /// Starts reading at the beginning of `file`.
    #[must_use]
    pub fn new(file: Box<dyn RandomAccessFile>) -> Self {
        Self { file, offset: 0 }
    }

    /// Returns the offset of the next read.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_vec(&mut self, len: u64) -> crate::Result<Vec<u8>> {
        let len = usize::try_from(len)
            .map_err(|_| crate::Error::Corruption("blob record is too large".into()))?;

        let mut buf = vec![0; len];
        self.file.read_exact_at(self.offset, &mut buf)?;
        self.offset += len as u64;

        Ok(buf)
    }

    /// Reads the file header.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the header is invalid.
    pub fn read_header(&mut self) -> crate::Result<BlobLogHeader> {
        let bytes = self.read_vec(HEADER_LEN as u64)?;
        Ok(BlobLogHeader::decode_from_slice(&bytes)?)
    }

    /// Reads the next record.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the record header is invalid.
    pub fn read_record(&mut self) -> crate::Result<BlobLogRecord> {
        let header = self.read_vec(RECORD_HEADER_LEN as u64)?;
        let mut record = BlobLogRecord::decode_header(&header)?;

        record.key = self.read_vec(record.key_size)?;
        record.value = self.read_vec(record.value_size)?;

        Ok(record)
    }

    /// Reads the footer.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the footer is invalid.
    pub fn read_footer(&mut self) -> crate::Result<BlobLogFooter> {
        let bytes = self.read_vec(FOOTER_LEN as u64)?;
        Ok(BlobLogFooter::decode_from_slice(&bytes)?)
    }
}

/// Random access reader for a closed blob file
#[allow(clippy::module_name_repetitions)]
pub struct BlobFileReader {
    file: Box<dyn RandomAccessFile>,
    file_number: BlobFileNumber,
    header: BlobLogHeader,
    footer: BlobLogFooter,
    file_size: u64,
}

impl BlobFileReader {
    /// Opens a blob file, validating its header and footer.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the file is malformed.
    pub fn open(
        fs: &dyn FileSystem,
        path: &Path,
        file_number: BlobFileNumber,
    ) -> crate::Result<Self> {
        let file = fs.open_readable(path)?;
        let file_size = file.len()?;

        if file_size < (HEADER_LEN + FOOTER_LEN) as u64 {
            return Err(crate::Error::corruption(
                "blob file",
                format!("{} is too small to hold header and footer", path.display()),
            ));
        }

        let mut header = [0; HEADER_LEN];
        file.read_exact_at(0, &mut header)?;
        let header = BlobLogHeader::decode_from_slice(&header)?;

        if header.has_ttl {
            return Err(crate::Error::corruption(
                "blob file",
                "files with TTL are not supported",
            ));
        }

        let mut footer = [0; FOOTER_LEN];
        file.read_exact_at(file_size - FOOTER_LEN as u64, &mut footer)?;
        let footer = BlobLogFooter::decode_from_slice(&footer)?;

        log::trace!(
            "blob file reader: opened blob file {file_number} ({} blobs, {file_size} bytes)",
            footer.blob_count
        );

        Ok(Self {
            file,
            file_number,
            header,
            footer,
            file_size,
        })
    }

    /// Returns the blob file number.
    #[must_use]
    pub fn file_number(&self) -> BlobFileNumber {
        self.file_number
    }

    /// Returns the file header.
    #[must_use]
    pub fn header(&self) -> &BlobLogHeader {
        &self.header
    }

    /// Returns the file footer.
    #[must_use]
    pub fn footer(&self) -> &BlobLogFooter {
        &self.footer
    }

    /// Reads the value of `user_key` stored at `offset`, verifying the
    /// record it belongs to, and decompresses it.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the record does not
    /// match the given key, size or compression.
    pub fn get_blob(
        &self,
        user_key: &[u8],
        offset: u64,
        value_size: u64,
        compression: CompressionType,
    ) -> crate::Result<Vec<u8>> {
        if compression != self.header.compression {
            return Err(crate::Error::Corruption(
                "Compression type mismatch when reading blob".into(),
            ));
        }

        let adjustment = RECORD_HEADER_LEN as u64 + user_key.len() as u64;

        let record_offset = offset
            .checked_sub(adjustment)
            .filter(|o| *o >= HEADER_LEN as u64)
            .ok_or_else(|| crate::Error::Corruption("Invalid blob offset".into()))?;

        let record_size = adjustment
            .checked_add(value_size)
            .ok_or_else(|| crate::Error::Corruption("Invalid blob offset".into()))?;

        let record_end = record_offset
            .checked_add(record_size)
            .ok_or_else(|| crate::Error::Corruption("Invalid blob offset".into()))?;

        if record_end > self.file_size.saturating_sub(FOOTER_LEN as u64) {
            return Err(crate::Error::Corruption("Invalid blob offset".into()));
        }

        let record_size = usize::try_from(record_size)
            .map_err(|_| crate::Error::Corruption("blob record is too large".into()))?;

        let mut buf = vec![0; record_size];
        self.file.read_exact_at(record_offset, &mut buf)?;

        let (header, rest) = buf.split_at(RECORD_HEADER_LEN);
        let mut record = BlobLogRecord::decode_header(header)?;

        if record.key_size != user_key.len() as u64 {
            return Err(crate::Error::Corruption(
                "Key size mismatch when reading blob".into(),
            ));
        }

        if record.value_size != value_size {
            return Err(crate::Error::Corruption(
                "Value size mismatch when reading blob".into(),
            ));
        }

        let (key, value) = rest.split_at(user_key.len());

        if key != user_key {
            return Err(crate::Error::Corruption(
                "Key mismatch when reading blob".into(),
            ));
        }

        record.key = key.to_vec();
        record.value = value.to_vec();
        record.check_blob_crc()?;

        compression.decompress(&record.value)
    }
}
