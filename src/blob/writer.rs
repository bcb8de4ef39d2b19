// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::format::{BlobLogFooter, BlobLogHeader, BlobLogRecord, RECORD_HEADER_LEN};
use crate::{
    coding::Encode,
    fs::WritableFile,
    id::BlobFileNumber,
    statistics::{record_tick, Ticker},
    IoError, Statistics,
};
use std::sync::Arc;

/// Checksum method name recorded in blob file additions
pub const FILE_CHECKSUM_CRC32C: &str = "FileChecksumCrc32c";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ElementType {
    Empty,
    Header,
    Record,
    Footer,
}

/// Low-level blob log writer
///
/// Writes the header, any number of records and the footer, in that order.
#[allow(clippy::module_name_repetitions)]
pub struct BlobLogWriter {
    file: Box<dyn WritableFile>,
    file_number: BlobFileNumber,
    use_fsync: bool,
    stats: Option<Arc<Statistics>>,

    offset: u64,
    last_element: ElementType,
    seen_error: bool,

    /// Running CRC32C over everything written, if enabled
    file_checksum: Option<u32>,
}

impl BlobLogWriter {
    /// Wraps an opened file.
    #[must_use]
    pub fn new(
        file: Box<dyn WritableFile>,
        file_number: BlobFileNumber,
        use_fsync: bool,
        enable_file_checksum: bool,
        stats: Option<Arc<Statistics>>,
    ) -> Self {
        Self {
            file,
            file_number,
            use_fsync,
            stats,
            offset: 0,
            last_element: ElementType::Empty,
            seen_error: false,
            file_checksum: enable_file_checksum.then_some(0),
        }
    }

    /// Returns the blob file number.
    #[must_use]
    pub fn file_number(&self) -> BlobFileNumber {
        self.file_number
    }

    /// Returns the number of bytes written so far.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn append(&mut self, bytes: &[u8]) -> crate::Result<()> {
        if let Err(e) = self.file.append(bytes) {
            self.seen_error = true;
            return Err(e);
        }

        if let Some(crc) = &mut self.file_checksum {
            *crc = crate::checksum::extend(*crc, bytes);
        }

        self.offset += bytes.len() as u64;
        record_tick(self.stats.as_ref(), Ticker::BlobFileBytesWritten, bytes.len() as u64);

        Ok(())
    }

    /// Syncs the file to disk.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn sync(&mut self) -> crate::Result<()> {
        if let Err(e) = self.file.sync(self.use_fsync) {
            self.seen_error = true;
            return Err(e);
        }

        record_tick(self.stats.as_ref(), Ticker::BlobFileSynced, 1);

        Ok(())
    }

    /// Writes the file header.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    ///
    /// # Panics
    ///
    /// Panics if anything has been written before.
    pub fn write_header(&mut self, header: &BlobLogHeader) -> crate::Result<()> {
        assert_eq!(ElementType::Empty, self.last_element, "header must come first");

        self.append(&header.encode_into_vec())?;

        if let Err(e) = self.file.flush() {
            self.seen_error = true;
            return Err(e);
        }

        self.last_element = ElementType::Header;
        Ok(())
    }

    /// Appends a record, returning the offsets of its key and its value.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    ///
    /// # Panics
    ///
    /// Panics if no header was written, or the footer was.
    pub fn add_record(
        &mut self,
        key: &[u8],
        value: &[u8],
        expiration: u64,
    ) -> crate::Result<(u64, u64)> {
        assert!(
            matches!(self.last_element, ElementType::Header | ElementType::Record),
            "records must follow the header"
        );

        let header = BlobLogRecord::encode_header(key, value, expiration);

        let key_offset = self.offset + RECORD_HEADER_LEN as u64;
        let blob_offset = key_offset + key.len() as u64;

        self.append(&header)?;
        self.append(key)?;
        self.append(value)?;

        if let Err(e) = self.file.flush() {
            self.seen_error = true;
            return Err(e);
        }

        self.last_element = ElementType::Record;

        Ok((key_offset, blob_offset))
    }

    /// Writes the footer, then syncs and closes the file.
    ///
    /// Returns the file checksum method and value, both empty if disabled.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, now or on an earlier write.
    ///
    /// # Panics
    ///
    /// Panics if no header was written, or the footer already was.
    pub fn append_footer(&mut self, footer: &BlobLogFooter) -> crate::Result<(String, Vec<u8>)> {
        assert!(
            matches!(self.last_element, ElementType::Header | ElementType::Record),
            "footer must follow the header or a record"
        );

        if self.seen_error {
            return Err(IoError::new("Seen Error. Skip closing.").into());
        }

        self.append(&footer.encode_into_vec())?;
        self.sync()?;

        if let Err(e) = self.file.close() {
            self.seen_error = true;
            return Err(e);
        }

        self.last_element = ElementType::Footer;

        log::trace!(
            "blob log writer: closed blob file {} at {} bytes",
            self.file_number,
            self.offset
        );

        Ok(match self.file_checksum {
            Some(crc) => (FILE_CHECKSUM_CRC32C.into(), crc.to_be_bytes().to_vec()),
            None => (String::new(), vec![]),
        })
    }
}
