// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::any::Any;

/// Type-erased cached object, owned by the cache
pub type ObjectPtr = Box<dyn Any + Send + Sync>;

/// Caller-supplied data passed through to [`CreateFn`]
pub type CreateContext = dyn Any + Send + Sync;

/// Returns the length of an object's persisted form.
pub type SizeFn = fn(&(dyn Any + Send + Sync)) -> usize;

/// Writes `out.len()` bytes of the persisted form, starting at `offset`.
pub type SaveToFn = fn(&(dyn Any + Send + Sync), usize, &mut [u8]) -> crate::Result<()>;

/// Recreates an object from its persisted form, returning it with its charge.
pub type CreateFn = fn(&[u8], Option<&CreateContext>) -> crate::Result<(ObjectPtr, usize)>;

/// What a cache entry is used for
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(clippy::module_name_repetitions)]
pub enum CacheEntryRole {
    /// Data block
    DataBlock,

    /// Filter block
    FilterBlock,

    /// Partitioned filter top level block
    FilterMetaBlock,

    /// Obsolete full-table filter block
    DeprecatedFilterBlock,

    /// Index block
    IndexBlock,

    /// Other table block
    OtherBlock,

    /// Write buffer reservation
    WriteBuffer,

    /// Compression dictionary building buffer reservation
    CompressionDictBuildingBuffer,

    /// Filter construction reservation
    FilterConstruction,

    /// Table reader reservation
    BlockBasedTableReader,

    /// File metadata reservation
    FileMetadata,

    /// Blob value
    BlobValue,

    /// Blob cache reservation
    BlobCache,

    /// Anything else
    #[default]
    Misc,
}

impl CacheEntryRole {
    /// All roles, in declaration order
    pub const ALL: [Self; 14] = [
        Self::DataBlock,
        Self::FilterBlock,
        Self::FilterMetaBlock,
        Self::DeprecatedFilterBlock,
        Self::IndexBlock,
        Self::OtherBlock,
        Self::WriteBuffer,
        Self::CompressionDictBuildingBuffer,
        Self::FilterConstruction,
        Self::BlockBasedTableReader,
        Self::FileMetadata,
        Self::BlobValue,
        Self::BlobCache,
        Self::Misc,
    ];

    /// Returns the camel case name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::DataBlock => "DataBlock",
            Self::FilterBlock => "FilterBlock",
            Self::FilterMetaBlock => "FilterMetaBlock",
            Self::DeprecatedFilterBlock => "DeprecatedFilterBlock",
            Self::IndexBlock => "IndexBlock",
            Self::OtherBlock => "OtherBlock",
            Self::WriteBuffer => "WriteBuffer",
            Self::CompressionDictBuildingBuffer => "CompressionDictionaryBuildingBuffer",
            Self::FilterConstruction => "FilterConstruction",
            Self::BlockBasedTableReader => "BlockBasedTableReader",
            Self::FileMetadata => "FileMetadata",
            Self::BlobValue => "BlobValue",
            Self::BlobCache => "BlobCache",
            Self::Misc => "Misc",
        }
    }
}

/// Describes how objects of one type are sized, saved and recreated
///
/// The cache never inspects objects itself; every call site hands the
/// matching helper in together with the object. Helpers are usually
/// `static` items.
///
/// `create` must be the exact inverse of `save_to` over the full
/// `size` bytes. A helper without `size`/`save_to`/`create` is not
/// secondary cache compatible and is never handed to a secondary cache.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct CacheItemHelper {
    /// Entry role
    pub role: CacheEntryRole,

    /// Persisted size
    pub size: Option<SizeFn>,

    /// Persist
    pub save_to: Option<SaveToFn>,

    /// Recreate
    pub create: Option<CreateFn>,

    /// Same role without secondary cache support
    pub without_secondary_compat: Option<&'static CacheItemHelper>,
}

impl CacheItemHelper {
    /// Creates a helper that only lives in the primary cache.
    #[must_use]
    pub const fn new(role: CacheEntryRole) -> Self {
        Self {
            role,
            size: None,
            save_to: None,
            create: None,
            without_secondary_compat: None,
        }
    }

    /// Creates a helper that can round-trip objects through a secondary cache.
    #[must_use]
    pub const fn with_secondary(
        role: CacheEntryRole,
        size: SizeFn,
        save_to: SaveToFn,
        create: CreateFn,
        without_secondary_compat: &'static Self,
    ) -> Self {
        Self {
            role,
            size: Some(size),
            save_to: Some(save_to),
            create: Some(create),
            without_secondary_compat: Some(without_secondary_compat),
        }
    }

    /// Returns `true` if objects can be spilled to a secondary cache.
    #[must_use]
    pub fn is_secondary_cache_compatible(&self) -> bool {
        self.size.is_some()
    }

    /// Returns the variant of this helper without secondary cache support.
    #[must_use]
    pub fn without_secondary(&self) -> &Self {
        self.without_secondary_compat.unwrap_or(self)
    }

    /// Serializes an object into its persisted form.
    ///
    /// # Errors
    ///
    /// Returns `NotSupported` if the helper cannot save objects, or the
    /// error of the save function.
    pub fn save(&self, obj: &(dyn Any + Send + Sync)) -> crate::Result<Vec<u8>> {
        let (Some(size), Some(save_to)) = (self.size, self.save_to) else {
            return Err(crate::Error::NotSupported(format!(
                "{} cannot be saved",
                self.role.name()
            )));
        };

        let mut buf = vec![0; size(obj)];
        save_to(obj, 0, &mut buf)?;
        Ok(buf)
    }

    /// Recreates an object from its persisted form.
    ///
    /// # Errors
    ///
    /// Returns `NotSupported` if the helper cannot create objects, or the
    /// error of the create function.
    pub fn create_object(
        &self,
        data: &[u8],
        ctx: Option<&CreateContext>,
    ) -> crate::Result<(ObjectPtr, usize)> {
        let create = self.create.ok_or_else(|| {
            crate::Error::NotSupported(format!("{} cannot be created", self.role.name()))
        })?;
        create(data, ctx)
    }
}

/// Helper for entries that only reserve memory and hold no object
pub static NOOP_HELPER: CacheItemHelper = CacheItemHelper::new(CacheEntryRole::Misc);
