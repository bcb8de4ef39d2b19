// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::cache::{CacheEntryRole, CacheItemHelper, CreateContext, ObjectPtr};
use std::{any::Any, sync::Arc};

/// Uncompressed blob value, as held by the blob cache
#[derive(Clone, Debug, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub struct BlobContents(Arc<[u8]>);

impl std::ops::Deref for BlobContents {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&[u8]> for BlobContents {
    fn from(value: &[u8]) -> Self {
        Self(value.into())
    }
}

impl From<Vec<u8>> for BlobContents {
    fn from(value: Vec<u8>) -> Self {
        Self(value.into())
    }
}

impl BlobContents {
    /// Returns the charge of the value against the cache capacity.
    #[must_use]
    pub fn charge(&self) -> usize {
        std::mem::size_of::<Self>() + self.0.len()
    }

    /// Cache item helper for blob values.
    #[must_use]
    pub fn cache_helper() -> &'static CacheItemHelper {
        &BLOB_CONTENTS_HELPER
    }
}

fn size(obj: &(dyn Any + Send + Sync)) -> usize {
    obj.downcast_ref::<BlobContents>().map_or(0, |c| c.len())
}

fn save_to(obj: &(dyn Any + Send + Sync), offset: usize, out: &mut [u8]) -> crate::Result<()> {
    let src = obj
        .downcast_ref::<BlobContents>()
        .and_then(|c| c.get(offset..offset + out.len()))
        .ok_or_else(|| crate::Error::InvalidArgument("blob contents out of range".into()))?;

    out.copy_from_slice(src);
    Ok(())
}

fn create(data: &[u8], _: Option<&CreateContext>) -> crate::Result<(ObjectPtr, usize)> {
    let contents = BlobContents::from(data);
    let charge = contents.charge();
    Ok((Box::new(contents), charge))
}

static BLOB_CONTENTS_NO_SECONDARY: CacheItemHelper =
    CacheItemHelper::new(CacheEntryRole::BlobValue);

static BLOB_CONTENTS_HELPER: CacheItemHelper = CacheItemHelper::with_secondary(
    CacheEntryRole::BlobValue,
    size,
    save_to,
    create,
    &BLOB_CONTENTS_NO_SECONDARY,
);

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn blob_contents_helper() -> crate::Result<()> {
        let helper = BlobContents::cache_helper();
        assert_eq!(CacheEntryRole::BlobValue, helper.role);
        assert!(helper.is_secondary_cache_compatible());
        assert!(!helper.without_secondary().is_secondary_cache_compatible());

        let contents = BlobContents::from(&b"blob value"[..]);
        let saved = helper.save(&contents)?;
        assert_eq!(b"blob value".to_vec(), saved);

        let (obj, charge) = helper.create_object(&saved, None)?;
        assert_eq!(contents.charge(), charge);
        assert_eq!(Some(&contents), obj.downcast_ref::<BlobContents>());

        Ok(())
    }
}
