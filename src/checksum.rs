// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! CRC32C helpers.
//!
//! Stored checksums are "masked": computing the CRC of a string that
//! contains embedded CRCs is problematic, so the raw value is rotated
//! and offset before being written out.

const MASK_DELTA: u32 = 0xa282_ead8;

/// Returns the CRC32C of `data`.
#[must_use]
pub fn value(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Extends `crc` (the CRC32C of some prefix) with `data`.
#[must_use]
pub fn extend(crc: u32, data: &[u8]) -> u32 {
    crc32c::crc32c_append(crc, data)
}

/// Returns a masked representation of `crc`.
#[must_use]
pub fn mask(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Returns the CRC whose masked representation is `masked`.
#[must_use]
pub fn unmask(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn crc32c_known_value() {
        // From RFC 3720 section B.4
        assert_eq!(0x8a91_36aa, value(&[0u8; 32]));
        assert_eq!(0x62a8_ab43, value(&[0xffu8; 32]));
    }

    #[test]
    fn crc32c_extend() {
        assert_eq!(value(b"hello world"), extend(value(b"hello "), b"world"));
    }

    #[test]
    fn crc32c_mask() {
        let crc = value(b"foo");
        assert_ne!(crc, mask(crc));
        assert_ne!(crc, mask(mask(crc)));
        assert_eq!(crc, unmask(mask(crc)));
        assert_eq!(crc, unmask(unmask(mask(mask(crc)))));
    }
}
