// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    addition::BlobFileAddition,
    contents::BlobContents,
    format::{BlobLogFooter, BlobLogHeader, RECORD_HEADER_LEN},
    index::BlobIndex,
    writer::BlobLogWriter,
};
use crate::{
    cache::{CacheTier, LruCache, OffsetableCacheKey, Priority},
    fs::FileSystem,
    id::{BlobFileNumber, ColumnFamilyId, IdGenerator},
    statistics::{record_in_histogram, record_tick, Histogram, Ticker},
    BlobFileConfig, PrepopulateBlobCache, Statistics,
};
use path_absolutize::Absolutize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// Why a blob file is being written
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum BlobFileCreationReason {
    /// Memtable flush
    #[default]
    Flush,

    /// Compaction
    Compaction,

    /// WAL recovery
    Recovery,
}

/// Describes a blob file that is done being written (or was abandoned)
#[derive(Clone, Debug)]
pub struct BlobFileCompletionInfo {
    /// File path
    pub path: PathBuf,

    /// Column family name
    pub column_family_name: String,

    /// ID of the job that wrote the file
    pub job_id: u64,

    /// Blob file number
    pub blob_file_number: BlobFileNumber,

    /// Creation reason
    pub reason: BlobFileCreationReason,

    /// File checksum method, empty if none or abandoned
    pub checksum_method: String,

    /// File checksum value, empty if none or abandoned
    pub checksum_value: Vec<u8>,

    /// Number of blobs written
    pub blob_count: u64,

    /// Bytes of all records written
    pub blob_bytes: u64,
}

/// Observes blob file creation, e.g. to track files in a space manager
pub trait BlobFileCompletionCallback: Send + Sync {
    /// Called before a blob file is created.
    fn on_blob_file_creation_started(
        &self,
        _path: &Path,
        _column_family_name: &str,
        _job_id: u64,
        _reason: BlobFileCreationReason,
    ) {
    }

    /// Called after a blob file was closed or abandoned, with the result of
    /// the close.
    ///
    /// The returned result replaces the close result.
    ///
    /// # Errors
    ///
    /// Returning `Err` fails the job that wrote the file.
    fn on_blob_file_completed(
        &self,
        _info: &BlobFileCompletionInfo,
        status: crate::Result<()>,
    ) -> crate::Result<()> {
        status
    }
}

/// Writes values to blob files, rotating files by size
///
/// Each flush or compaction job owns one builder; only the file number
/// generator is shared between jobs.
#[allow(clippy::module_name_repetitions)]
pub struct BlobFileBuilder {
    fs: Arc<dyn FileSystem>,
    folder: PathBuf,
    id_generator: IdGenerator,
    config: BlobFileConfig,

    column_family_id: ColumnFamilyId,
    column_family_name: String,
    job_id: u64,
    reason: BlobFileCreationReason,

    db_id: String,
    db_session_id: String,
    blob_cache: Option<LruCache>,
    lowest_used_cache_tier: CacheTier,

    stats: Option<Arc<Statistics>>,
    callback: Option<Arc<dyn BlobFileCompletionCallback>>,

    writer: Option<BlobLogWriter>,
    blob_count: u64,
    blob_bytes: u64,

    blob_file_paths: Vec<PathBuf>,
    blob_file_additions: Vec<BlobFileAddition>,
}

impl BlobFileBuilder {
    /// Creates a builder that writes blob files into `folder`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the folder cannot be resolved or created.
    pub fn new<P: AsRef<Path>>(
        fs: Arc<dyn FileSystem>,
        folder: P,
        id_generator: IdGenerator,
        config: BlobFileConfig,
    ) -> crate::Result<Self> {
        let folder = folder.as_ref().absolutize()?.into_owned();
        fs.create_dir_all(&folder)?;

        Ok(Self {
            fs,
            folder,
            id_generator,
            config,
            column_family_id: 0,
            column_family_name: "default".into(),
            job_id: 0,
            reason: BlobFileCreationReason::Flush,
            db_id: String::new(),
            db_session_id: String::new(),
            blob_cache: None,
            lowest_used_cache_tier: CacheTier::Volatile,
            stats: None,
            callback: None,
            writer: None,
            blob_count: 0,
            blob_bytes: 0,
            blob_file_paths: vec![],
            blob_file_additions: vec![],
        })
    }

    /// Sets the column family the blobs belong to.
    #[must_use]
    pub fn column_family<S: Into<String>>(mut self, id: ColumnFamilyId, name: S) -> Self {
        self.column_family_id = id;
        self.column_family_name = name.into();
        self
    }

    /// Sets the ID of the job that owns the builder.
    #[must_use]
    pub fn job_id(mut self, job_id: u64) -> Self {
        self.job_id = job_id;
        self
    }

    /// Sets why the blob files are written.
    #[must_use]
    pub fn creation_reason(mut self, reason: BlobFileCreationReason) -> Self {
        self.reason = reason;
        self
    }

    /// Sets the database identity that blob cache keys are derived from.
    #[must_use]
    pub fn db_identity<S: Into<String>>(mut self, db_id: S, db_session_id: S) -> Self {
        self.db_id = db_id.into();
        self.db_session_id = db_session_id.into();
        self
    }

    /// Sets the blob cache that freshly written values may be inserted into.
    #[must_use]
    pub fn blob_cache(mut self, cache: LruCache, lowest_used_cache_tier: CacheTier) -> Self {
        self.blob_cache = Some(cache);
        self.lowest_used_cache_tier = lowest_used_cache_tier;
        self
    }

    /// Sets the statistics sink.
    #[must_use]
    pub fn statistics(mut self, stats: Arc<Statistics>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Sets the completion callback.
    #[must_use]
    pub fn completion_callback(mut self, callback: Arc<dyn BlobFileCompletionCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Returns the paths of all files opened so far, including unfinished ones.
    #[must_use]
    pub fn blob_file_paths(&self) -> &[PathBuf] {
        &self.blob_file_paths
    }

    /// Returns the additions of all successfully closed files.
    #[must_use]
    pub fn blob_file_additions(&self) -> &[BlobFileAddition] {
        &self.blob_file_additions
    }

    /// Returns `true` if a blob file is currently open.
    #[must_use]
    pub fn is_blob_file_open(&self) -> bool {
        self.writer.is_some()
    }

    fn blob_file_path(&self, file_number: BlobFileNumber) -> PathBuf {
        self.folder.join(format!("{file_number:06}.blob"))
    }

    /// Writes `value` to a blob file, unless it is smaller than the minimum
    /// blob size, in which case `None` is returned and the value should be
    /// stored inline.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> crate::Result<Option<BlobIndex>> {
        if (value.len() as u64) < self.config.min_blob_size {
            return Ok(None);
        }

        self.open_blob_file_if_needed()?;

        let compression = self.config.compression;
        let blob = compression.compress(value)?;

        let (file_number, blob_offset) = self.write_blob_to_file(key, &blob)?;

        self.close_blob_file_if_needed()?;

        if let Err(e) = self.put_blob_into_cache_if_needed(value, file_number, blob_offset) {
            log::warn!("Failed to pre-populate the blob into blob cache: {e}");
        }

        record_in_histogram(self.stats.as_ref(), Histogram::BlobDbBlobSize, value.len() as u64);

        Ok(Some(BlobIndex::Blob {
            file_number,
            offset: blob_offset,
            size: blob.len() as u64,
            compression,
        }))
    }

    /// Closes the open blob file, if any.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn finish(&mut self) -> crate::Result<()> {
        if !self.is_blob_file_open() {
            return Ok(());
        }

        self.close_blob_file()
    }

    /// Discards the open blob file, if any, without writing a footer.
    ///
    /// The completion callback is told about the partial file with `error`.
    pub fn abandon(&mut self, error: &crate::Error) {
        let Some(writer) = self.writer.take() else {
            return;
        };

        log::debug!(
            "[{}] [JOB {}] Abandoning blob file #{}: {error}",
            self.column_family_name,
            self.job_id,
            writer.file_number()
        );

        if let Some(callback) = &self.callback {
            let info = self.completion_info(writer.file_number(), String::new(), vec![]);

            // The job already failed, so the callback's verdict does not matter
            let _ = callback.on_blob_file_completed(&info, Err(error.clone()));
        }

        self.blob_count = 0;
        self.blob_bytes = 0;
    }

    fn completion_info(
        &self,
        blob_file_number: BlobFileNumber,
        checksum_method: String,
        checksum_value: Vec<u8>,
    ) -> BlobFileCompletionInfo {
        BlobFileCompletionInfo {
            path: self
                .blob_file_paths
                .last()
                .cloned()
                .unwrap_or_else(|| self.blob_file_path(blob_file_number)),
            column_family_name: self.column_family_name.clone(),
            job_id: self.job_id,
            blob_file_number,
            reason: self.reason,
            checksum_method,
            checksum_value,
            blob_count: self.blob_count,
            blob_bytes: self.blob_bytes,
        }
    }

    fn open_blob_file_if_needed(&mut self) -> crate::Result<()> {
        if self.is_blob_file_open() {
            return Ok(());
        }

        debug_assert_eq!(0, self.blob_count);
        debug_assert_eq!(0, self.blob_bytes);

        let file_number = self.id_generator.next();
        let path = self.blob_file_path(file_number);

        if let Some(callback) = &self.callback {
            callback.on_blob_file_creation_started(
                &path,
                &self.column_family_name,
                self.job_id,
                self.reason,
            );
        }

        log::debug!(
            "[{}] [JOB {}] Creating blob file #{file_number} at {}",
            self.column_family_name,
            self.job_id,
            path.display()
        );

        let file = self.fs.new_writable_file(&path)?;

        // NOTE: Paths are recorded right after the open, so a failed job
        // can clean up, additions only once a file is successfully closed
        self.blob_file_paths.push(path);

        let mut writer = BlobLogWriter::new(
            file,
            file_number,
            self.config.use_fsync,
            self.config.enable_file_checksum,
            self.stats.clone(),
        );

        let header = BlobLogHeader::new(
            self.column_family_id,
            self.config.compression,
            false,
            (0, 0),
        );
        writer.write_header(&header)?;

        self.writer = Some(writer);

        Ok(())
    }

    fn write_blob_to_file(
        &mut self,
        key: &[u8],
        blob: &[u8],
    ) -> crate::Result<(BlobFileNumber, u64)> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| crate::Error::Aborted("blob file is not open".into()))?;

        let (_, blob_offset) = writer.add_record(key, blob, 0)?;

        self.blob_count += 1;
        self.blob_bytes += (RECORD_HEADER_LEN + key.len() + blob.len()) as u64;

        Ok((writer.file_number(), blob_offset))
    }

    fn close_blob_file_if_needed(&mut self) -> crate::Result<()> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };

        if writer.offset() < self.config.blob_file_size {
            return Ok(());
        }

        self.close_blob_file()
    }

    fn close_blob_file(&mut self) -> crate::Result<()> {
        let Some(writer) = &mut self.writer else {
            return Ok(());
        };

        let footer = BlobLogFooter {
            blob_count: self.blob_count,
            expiration_range: (0, 0),
        };

        let (checksum_method, checksum_value) = writer.append_footer(&footer)?;
        let file_number = writer.file_number();

        let mut result = Ok(());

        if let Some(callback) = &self.callback {
            let info =
                self.completion_info(file_number, checksum_method.clone(), checksum_value.clone());
            result = callback.on_blob_file_completed(&info, result);
        }

        self.blob_file_additions.push(BlobFileAddition::new(
            file_number,
            self.blob_count,
            self.blob_bytes,
            checksum_method,
            checksum_value,
        ));

        log::info!(
            "[{}] [JOB {}] Generated blob file #{file_number}: {} total blobs, {} total bytes",
            self.column_family_name,
            self.job_id,
            self.blob_count,
            self.blob_bytes
        );

        self.writer = None;
        self.blob_count = 0;
        self.blob_bytes = 0;

        result
    }

    fn put_blob_into_cache_if_needed(
        &self,
        blob: &[u8],
        file_number: BlobFileNumber,
        blob_offset: u64,
    ) -> crate::Result<()> {
        let warm_cache = self.config.prepopulate_blob_cache == PrepopulateBlobCache::FlushOnly
            && self.reason == BlobFileCreationReason::Flush;

        let Some(cache) = self.blob_cache.as_ref().filter(|_| warm_cache) else {
            return Ok(());
        };

        let key = OffsetableCacheKey::new(&self.db_id, &self.db_session_id, file_number)
            .with_offset(blob_offset);

        let result = cache.insert_saved(
            key,
            blob,
            BlobContents::cache_helper(),
            None,
            Priority::Bottom,
            self.lowest_used_cache_tier,
        );

        if result.is_ok() {
            record_tick(self.stats.as_ref(), Ticker::BlobCacheAdd, 1);
            record_tick(self.stats.as_ref(), Ticker::BlobCacheBytesWrite, blob.len() as u64);
        } else {
            record_tick(self.stats.as_ref(), Ticker::BlobCacheAddFailures, 1);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        blob::reader::BlobFileReader,
        mock::{FaultPoint, MockFileSystem},
        CompressionType, IoError, LruCacheConfig,
    };
    use parking_lot::Mutex;
    use test_log::test;

    fn builder(fs: &MockFileSystem, config: BlobFileConfig) -> crate::Result<BlobFileBuilder> {
        BlobFileBuilder::new(Arc::new(fs.clone()), "/db/blobs", IdGenerator::new(1), config)
    }

    #[derive(Default)]
    struct RecordingCallback {
        started: Mutex<Vec<PathBuf>>,
        completed: Mutex<Vec<(BlobFileCompletionInfo, bool)>>,
    }

    impl BlobFileCompletionCallback for RecordingCallback {
        fn on_blob_file_creation_started(
            &self,
            path: &Path,
            _: &str,
            _: u64,
            _: BlobFileCreationReason,
        ) {
            self.started.lock().push(path.into());
        }

        fn on_blob_file_completed(
            &self,
            info: &BlobFileCompletionInfo,
            status: crate::Result<()>,
        ) -> crate::Result<()> {
            self.completed.lock().push((info.clone(), status.is_ok()));
            status
        }
    }

    #[test]
    fn blob_builder_min_blob_size() -> crate::Result<()> {
        let fs = MockFileSystem::default();
        let mut builder = builder(&fs, BlobFileConfig::default().min_blob_size(10))?;

        assert_eq!(None, builder.add(b"key", b"small")?);
        builder.finish()?;

        assert!(fs.list().is_empty());
        assert!(builder.blob_file_paths().is_empty());
        assert!(builder.blob_file_additions().is_empty());

        Ok(())
    }

    #[test]
    fn blob_builder_write_and_read() -> crate::Result<()> {
        let fs = MockFileSystem::default();
        let callback = Arc::new(RecordingCallback::default());

        let mut builder = builder(&fs, BlobFileConfig::default())?
            .column_family(3, "cf")
            .job_id(7)
            .completion_callback(callback.clone());

        let index = builder.add(b"key", b"value")?.expect("should write blob");
        builder.finish()?;

        let BlobIndex::Blob {
            file_number,
            offset,
            size,
            compression,
        } = index
        else {
            panic!("should be a blob reference");
        };

        assert_eq!(1, file_number);
        assert_eq!(30 + 32 + 3, offset);
        assert_eq!(5, size);

        let path = builder.blob_file_paths()[0].clone();
        assert!(path.ends_with("000001.blob"));

        let reader = BlobFileReader::open(&fs, &path, file_number)?;
        assert_eq!(3, reader.header().column_family_id);
        assert_eq!(b"value".to_vec(), reader.get_blob(b"key", offset, size, compression)?);

        let additions = builder.blob_file_additions();
        assert_eq!(1, additions.len());
        assert_eq!(1, additions[0].total_blob_count);
        assert_eq!(32 + 3 + 5, additions[0].total_blob_bytes);
        assert_eq!("FileChecksumCrc32c", additions[0].checksum_method);

        assert_eq!(vec![path], *callback.started.lock());
        let completed = callback.completed.lock();
        assert_eq!(1, completed.len());
        assert!(completed[0].1);
        assert_eq!(7, completed[0].0.job_id);

        Ok(())
    }

    #[test]
    #[cfg(feature = "lz4")]
    fn blob_builder_compression() -> crate::Result<()> {
        let fs = MockFileSystem::default();
        let mut builder = builder(
            &fs,
            BlobFileConfig::default().compression(CompressionType::Lz4),
        )?;

        let value = b"abcdefgh".repeat(1_000);
        let index = builder.add(b"key", &value)?.expect("should write blob");
        builder.finish()?;

        let BlobIndex::Blob {
            file_number,
            offset,
            size,
            compression,
        } = index
        else {
            panic!("should be a blob reference");
        };

        assert!(size < value.len() as u64);
        assert_eq!(CompressionType::Lz4, compression);

        let reader = BlobFileReader::open(&fs, &builder.blob_file_paths()[0], file_number)?;
        assert_eq!(value, reader.get_blob(b"key", offset, size, compression)?);

        assert!(matches!(
            reader.get_blob(b"key", offset, size, CompressionType::None),
            Err(crate::Error::Corruption(msg)) if msg == "Compression type mismatch when reading blob"
        ));

        Ok(())
    }

    #[test]
    fn blob_builder_abandon() -> crate::Result<()> {
        let fs = MockFileSystem::default();
        let callback = Arc::new(RecordingCallback::default());

        let mut builder =
            builder(&fs, BlobFileConfig::default())?.completion_callback(callback.clone());

        builder.add(b"key", b"value")?;
        builder.abandon(&crate::Error::Aborted("compaction failed".into()));
        assert!(!builder.is_blob_file_open());

        // Nothing left to close
        builder.finish()?;

        assert_eq!(1, builder.blob_file_paths().len());
        assert!(builder.blob_file_additions().is_empty());

        let completed = callback.completed.lock();
        assert_eq!(1, completed.len());
        assert!(!completed[0].1);
        assert_eq!(1, completed[0].0.blob_count);
        assert!(completed[0].0.checksum_method.is_empty());

        Ok(())
    }

    #[test]
    fn blob_builder_open_failure() -> crate::Result<()> {
        let fs = MockFileSystem::default();
        let mut builder = builder(&fs, BlobFileConfig::default())?;

        fs.inject(FaultPoint::Create, IoError::new("create").retryable(true));
        let err = builder.add(b"key", b"value").err().expect("should fail");
        assert!(err.is_retryable());

        assert!(builder.blob_file_paths().is_empty());
        assert!(!builder.is_blob_file_open());

        Ok(())
    }

    #[test]
    fn blob_builder_prepopulates_on_flush_only() -> crate::Result<()> {
        let stats = Statistics::new();

        for (reason, expected) in [
            (BlobFileCreationReason::Flush, 1),
            (BlobFileCreationReason::Compaction, 0),
        ] {
            let fs = MockFileSystem::default();
            let cache = LruCache::new(LruCacheConfig::new(1_024 * 1_024))?;

            let mut builder = builder(
                &fs,
                BlobFileConfig::default().prepopulate_blob_cache(PrepopulateBlobCache::FlushOnly),
            )?
            .creation_reason(reason)
            .db_identity("db", "session")
            .blob_cache(cache.clone(), CacheTier::Volatile)
            .statistics(stats.clone());

            let Some(BlobIndex::Blob {
                file_number, offset, ..
            }) = builder.add(b"key", b"value")?
            else {
                panic!("should be a blob reference");
            };
            builder.finish()?;

            assert_eq!(expected, cache.entry_count());

            let key = OffsetableCacheKey::new("db", "session", file_number).with_offset(offset);
            let handle = cache.lookup(&key, None, None, Priority::Low);
            assert_eq!(expected == 1, handle.is_some());

            if let Some(handle) = handle {
                let contents = handle.downcast::<BlobContents>().expect("should be blob");
                assert_eq!(b"value", &**contents);
            }
        }

        assert_eq!(1, stats.ticker(Ticker::BlobCacheAdd));
        assert_eq!(5, stats.ticker(Ticker::BlobCacheBytesWrite));

        Ok(())
    }
}
