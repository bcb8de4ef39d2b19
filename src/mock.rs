// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    fs::{FileSystem, RandomAccessFile, WritableFile},
    IoError,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

type FileData = Arc<Mutex<Vec<u8>>>;

/// File system operation that can be made to fail
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FaultPoint {
    /// Creating a writable file
    Create,

    /// Appending to a writable file
    Append,

    /// Syncing a writable file
    Sync,

    /// Closing a writable file
    Close,
}

#[derive(Default)]
struct MockFileSystemInner {
    files: Mutex<HashMap<PathBuf, FileData>>,
    faults: Mutex<HashMap<FaultPoint, IoError>>,
    free_space: Mutex<Option<u64>>,
    injected: AtomicU64,
}

/// In-memory file system with fault injection
///
/// Used for tests only
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Default)]
pub struct MockFileSystem(Arc<MockFileSystemInner>);

impl MockFileSystem {
    /// Makes every future call to `point` fail with `error`.
    pub fn inject(&self, point: FaultPoint, error: IoError) {
        self.0.faults.lock().insert(point, error);
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        self.0.faults.lock().clear();
    }

    /// Number of calls that failed because of an injected fault.
    #[must_use]
    pub fn injected_count(&self) -> u64 {
        self.0.injected.load(Ordering::Relaxed)
    }

    /// Sets the value returned by `free_space`; `None` makes it unsupported.
    pub fn set_free_space(&self, bytes: Option<u64>) {
        *self.0.free_space.lock() = bytes;
    }

    /// Returns a copy of a file's contents.
    #[must_use]
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.0.files.lock().get(path).map(|data| data.lock().clone())
    }

    /// Overwrites one byte of a file.
    pub fn corrupt(&self, path: &Path, offset: usize) {
        if let Some(data) = self.0.files.lock().get(path) {
            if let Some(byte) = data.lock().get_mut(offset) {
                *byte ^= 0xff;
            }
        }
    }

    /// Lists all file paths, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<PathBuf> {
        let mut paths = self.0.files.lock().keys().cloned().collect::<Vec<_>>();
        paths.sort();
        paths
    }

    fn check(&self, point: FaultPoint) -> crate::Result<()> {
        if let Some(err) = self.0.faults.lock().get(&point) {
            self.0.injected.fetch_add(1, Ordering::Relaxed);
            return Err(err.clone().into());
        }
        Ok(())
    }
}

struct MockWritableFile {
    fs: MockFileSystem,
    data: FileData,
    closed: bool,
}

impl MockWritableFile {
    fn ensure_open(&self) -> crate::Result<()> {
        if self.closed {
            return Err(IoError::new("file is already closed").into());
        }
        Ok(())
    }
}

impl WritableFile for MockWritableFile {
    fn append(&mut self, data: &[u8]) -> crate::Result<()> {
        self.ensure_open()?;
        self.fs.check(FaultPoint::Append)?;
        self.data.lock().extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> crate::Result<()> {
        self.ensure_open()
    }

    fn sync(&mut self, _: bool) -> crate::Result<()> {
        self.ensure_open()?;
        self.fs.check(FaultPoint::Sync)
    }

    fn close(&mut self) -> crate::Result<()> {
        self.fs.check(FaultPoint::Close)?;
        self.closed = true;
        Ok(())
    }

    fn file_size(&self) -> u64 {
        self.data.lock().len() as u64
    }
}

struct MockRandomAccessFile(FileData);

impl RandomAccessFile for MockRandomAccessFile {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> crate::Result<()> {
        let data = self.0.lock();

        let start = usize::try_from(offset).map_err(|_| IoError::new("offset overflow"))?;
        let end = start + buf.len();

        let src = data
            .get(start..end)
            .ok_or_else(|| IoError::new("read past end of file"))?;
        buf.copy_from_slice(src);

        Ok(())
    }

    fn len(&self) -> crate::Result<u64> {
        Ok(self.0.lock().len() as u64)
    }
}

impl FileSystem for MockFileSystem {
    fn new_writable_file(&self, path: &Path) -> crate::Result<Box<dyn WritableFile>> {
        self.check(FaultPoint::Create)?;

        let data = FileData::default();
        self.0.files.lock().insert(path.into(), data.clone());

        Ok(Box::new(MockWritableFile {
            fs: self.clone(),
            data,
            closed: false,
        }))
    }

    fn open_readable(&self, path: &Path) -> crate::Result<Box<dyn RandomAccessFile>> {
        let data = self
            .0
            .files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| IoError::path_not_found(path.display().to_string()))?;

        Ok(Box::new(MockRandomAccessFile(data)))
    }

    fn rename(&self, from: &Path, to: &Path) -> crate::Result<()> {
        let mut files = self.0.files.lock();

        let data = files
            .remove(from)
            .ok_or_else(|| IoError::path_not_found(from.display().to_string()))?;
        files.insert(to.into(), data);

        Ok(())
    }

    fn delete_file(&self, path: &Path) -> crate::Result<()> {
        self.0
            .files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| IoError::path_not_found(path.display().to_string()).into())
    }

    fn create_dir_all(&self, _: &Path) -> crate::Result<()> {
        Ok(())
    }

    fn file_exists(&self, path: &Path) -> crate::Result<bool> {
        Ok(self.0.files.lock().contains_key(path))
    }

    fn free_space(&self, _: &Path) -> crate::Result<u64> {
        (*self.0.free_space.lock())
            .ok_or_else(|| crate::Error::NotSupported("free space probe".into()))
    }
}
