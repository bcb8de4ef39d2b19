// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use xxhash_rust::xxh3::{xxh3_128, xxh3_64};

/// Odd multiplier, so that mixing in the file number stays a bijection
const FILE_NUMBER_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// Fixed-size, content-addressed cache key
///
/// Built from the tuple of (DB ID, DB session ID, file number, offset), see
/// [`OffsetableCacheKey`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(clippy::module_name_repetitions)]
pub struct CacheKey {
    session_etc: u64,
    offset_etc: u64,
}

impl CacheKey {
    /// Size of the binary representation
    pub const LEN: usize = 16;

    /// Creates a key from its raw halves.
    #[must_use]
    pub const fn from_raw(session_etc: u64, offset_etc: u64) -> Self {
        Self {
            session_etc,
            offset_etc,
        }
    }

    /// Returns `true` for the all-zero key, which is never derived from a file.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.session_etc == 0 && self.offset_etc == 0
    }

    /// Returns the binary representation.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0; Self::LEN];
        let (session, offset) = bytes.split_at_mut(8);
        session.copy_from_slice(&self.session_etc.to_le_bytes());
        offset.copy_from_slice(&self.offset_etc.to_le_bytes());
        bytes
    }

    /// Hash used for shard selection.
    #[must_use]
    pub fn hash64(&self) -> u64 {
        xxh3_64(&self.to_bytes())
    }
}

impl From<[u8; CacheKey::LEN]> for CacheKey {
    fn from(bytes: [u8; CacheKey::LEN]) -> Self {
        let mut session = [0; 8];
        let mut offset = [0; 8];
        let (a, b) = bytes.split_at(8);
        session.copy_from_slice(a);
        offset.copy_from_slice(b);

        Self {
            session_etc: u64::from_le_bytes(session),
            offset_etc: u64::from_le_bytes(offset),
        }
    }
}

/// Cache key prefix for one file, combined with a block/blob offset
/// through [`OffsetableCacheKey::with_offset`]
///
/// Distinct (file number, offset) pairs of the same session never collide.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct OffsetableCacheKey {
    session_etc: u64,
    offset_etc: u64,
}

impl OffsetableCacheKey {
    /// Derives the key prefix of a file.
    #[must_use]
    pub fn new(db_id: &str, db_session_id: &str, file_number: u64) -> Self {
        let mut seed = Vec::with_capacity(db_id.len() + db_session_id.len() + 1);
        seed.extend_from_slice(db_id.as_bytes());
        seed.push(0);
        seed.extend_from_slice(db_session_id.as_bytes());

        let h = xxh3_128(&seed);

        #[allow(clippy::cast_possible_truncation)]
        let (hi, lo) = ((h >> 64) as u64, h as u64);

        Self {
            session_etc: hi.wrapping_add(file_number.wrapping_mul(FILE_NUMBER_MIX)),
            offset_etc: lo,
        }
    }

    /// Returns the cache key of the entry at `offset`.
    #[must_use]
    pub fn with_offset(&self, offset: u64) -> CacheKey {
        CacheKey::from_raw(self.session_etc, self.offset_etc ^ offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use test_log::test;

    #[test]
    fn cache_key_bytes() {
        let key = CacheKey::from_raw(1, 2);
        assert_eq!(key, CacheKey::from(key.to_bytes()));
        assert!(!key.is_empty());
        assert!(CacheKey::default().is_empty());
    }

    #[test]
    fn cache_key_unique() {
        let mut seen = HashSet::new();

        for file_number in 1..20 {
            let base = OffsetableCacheKey::new("db", "session", file_number);
            for offset in 0..20 {
                assert!(seen.insert(base.with_offset(offset)));
            }
        }

        let other_session = OffsetableCacheKey::new("db", "session2", 1);
        assert!(!seen.contains(&other_session.with_offset(0)));
    }

    #[test]
    fn cache_key_deterministic() {
        let a = OffsetableCacheKey::new("db", "session", 5).with_offset(100);
        let b = OffsetableCacheKey::new("db", "session", 5).with_offset(100);
        assert_eq!(a, b);
        assert_eq!(a.hash64(), b.hash64());
    }
}
