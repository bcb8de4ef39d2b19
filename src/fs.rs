// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Byte-oriented file system capability.
//!
//! Every operation returns a classified [`IoError`](crate::IoError) on failure,
//! so callers (mostly the background error handler) can tell retryable,
//! file-scoped and out-of-space failures apart.

use parking_lot::Mutex;
use std::{
    fs::File,
    io::{BufWriter, Read, Seek, SeekFrom, Write},
    path::Path,
};

/// Append-only file handle
pub trait WritableFile: Send {
    /// Appends bytes.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn append(&mut self, data: &[u8]) -> crate::Result<()>;

    /// Flushes userspace buffers.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn flush(&mut self) -> crate::Result<()>;

    /// Persists the file; `use_fsync` forces a full `fsync`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn sync(&mut self, use_fsync: bool) -> crate::Result<()>;

    /// Flushes and closes the file. Further appends fail.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn close(&mut self) -> crate::Result<()>;

    /// Bytes appended so far.
    fn file_size(&self) -> u64;
}

/// Positional read handle
pub trait RandomAccessFile: Send + Sync {
    /// Fills `buf` with the bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs, or the range is out of bounds.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> crate::Result<()>;

    /// Returns the file length.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn len(&self) -> crate::Result<u64>;
}

/// File system capability consumed by blob files and error recovery
pub trait FileSystem: Send + Sync {
    /// Creates (or truncates) a file for appending.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn new_writable_file(&self, path: &Path) -> crate::Result<Box<dyn WritableFile>>;

    /// Opens a file for positional reads.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn open_readable(&self, path: &Path) -> crate::Result<Box<dyn RandomAccessFile>>;

    /// Renames a file, replacing the target.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn rename(&self, from: &Path, to: &Path) -> crate::Result<()>;

    /// Deletes a file.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn delete_file(&self, path: &Path) -> crate::Result<()>;

    /// Creates a directory and all its parents.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn create_dir_all(&self, path: &Path) -> crate::Result<()>;

    /// Returns `true` if the file exists.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn file_exists(&self, path: &Path) -> crate::Result<bool>;

    /// Returns the free bytes on the volume holding `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotSupported` if the platform has no probe.
    fn free_space(&self, path: &Path) -> crate::Result<u64>;
}

/// [`FileSystem`] backed by `std::fs`
#[derive(Clone, Copy, Debug, Default)]
pub struct StdFileSystem;

struct StdWritableFile {
    writer: Option<BufWriter<File>>,
    size: u64,
}

impl StdWritableFile {
    fn writer(&mut self) -> crate::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| crate::IoError::new("file is already closed").into())
    }
}

impl WritableFile for StdWritableFile {
    fn append(&mut self, data: &[u8]) -> crate::Result<()> {
        self.writer()?.write_all(data)?;
        self.size += data.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> crate::Result<()> {
        self.writer()?.flush()?;
        Ok(())
    }

    fn sync(&mut self, use_fsync: bool) -> crate::Result<()> {
        let writer = self.writer()?;
        writer.flush()?;

        if use_fsync {
            writer.get_mut().sync_all()?;
        } else {
            writer.get_mut().sync_data()?;
        }

        Ok(())
    }

    fn close(&mut self) -> crate::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    fn file_size(&self) -> u64 {
        self.size
    }
}

struct StdRandomAccessFile(Mutex<File>);

impl RandomAccessFile for StdRandomAccessFile {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> crate::Result<()> {
        let mut file = self.0.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn len(&self) -> crate::Result<u64> {
        Ok(self.0.lock().metadata()?.len())
    }
}

impl FileSystem for StdFileSystem {
    fn new_writable_file(&self, path: &Path) -> crate::Result<Box<dyn WritableFile>> {
        let file = File::create(path)?;

        Ok(Box::new(StdWritableFile {
            writer: Some(BufWriter::new(file)),
            size: 0,
        }))
    }

    fn open_readable(&self, path: &Path) -> crate::Result<Box<dyn RandomAccessFile>> {
        let file = File::open(path)?;
        Ok(Box::new(StdRandomAccessFile(Mutex::new(file))))
    }

    fn rename(&self, from: &Path, to: &Path) -> crate::Result<()> {
        std::fs::rename(from, to)?;
        Ok(())
    }

    fn delete_file(&self, path: &Path) -> crate::Result<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> crate::Result<()> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    fn file_exists(&self, path: &Path) -> crate::Result<bool> {
        Ok(path.try_exists()?)
    }

    fn free_space(&self, _: &Path) -> crate::Result<u64> {
        Err(crate::Error::NotSupported("free space probe".into()))
    }
}
