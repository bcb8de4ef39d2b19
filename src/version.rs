// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Blob log magic number, shared by file header and footer
pub const MAGIC_NUMBER: u32 = 0x0024_8f37;

/// Blob log format version
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Version {
    /// Initial blob log format
    V1,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

impl From<Version> for u32 {
    fn from(value: Version) -> Self {
        match value {
            Version::V1 => 1,
        }
    }
}

impl TryFrom<u32> for Version {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            _ => Err(()),
        }
    }
}

impl Version {
    /// Size of magic + version
    pub(crate) const fn len() -> usize {
        8
    }

    /// Reads magic + version.
    ///
    /// Returns `Ok(None)` if the magic number does not match, and
    /// `Ok(Some(Err(raw)))` for an unknown version number.
    pub(crate) fn read_prefix<R: std::io::Read>(
        reader: &mut R,
    ) -> std::io::Result<Option<Result<Self, u32>>> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != MAGIC_NUMBER {
            return Ok(None);
        }

        let raw = reader.read_u32::<LittleEndian>()?;
        Ok(Some(Self::try_from(raw).map_err(|()| raw)))
    }

    pub(crate) fn write_prefix<W: std::io::Write>(self, writer: &mut W) -> std::io::Result<usize> {
        writer.write_u32::<LittleEndian>(MAGIC_NUMBER)?;
        writer.write_u32::<LittleEndian>(u32::from(self))?;
        Ok(Self::len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    pub fn version_serialize() -> std::io::Result<()> {
        let mut bytes = vec![];
        let written = Version::V1.write_prefix(&mut bytes)?;
        assert_eq!(Version::len(), written);
        assert_eq!(bytes, &[0x37, 0x8f, 0x24, 0x00, 1, 0, 0, 0]);
        Ok(())
    }

    #[test]
    pub fn version_deserialize_success() -> std::io::Result<()> {
        let mut reader = &[0x37, 0x8f, 0x24, 0x00, 1, 0, 0, 0][..];
        assert_eq!(Some(Ok(Version::V1)), Version::read_prefix(&mut reader)?);
        Ok(())
    }

    #[test]
    pub fn version_deserialize_bad_magic() -> std::io::Result<()> {
        let mut reader = &[b'V', b'L', b'G', 1, 1, 0, 0, 0][..];
        assert_eq!(None, Version::read_prefix(&mut reader)?);
        Ok(())
    }

    #[test]
    pub fn version_deserialize_unknown() -> std::io::Result<()> {
        let mut reader = &[0x37, 0x8f, 0x24, 0x00, 7, 0, 0, 0][..];
        assert_eq!(Some(Err(7)), Version::read_prefix(&mut reader)?);
        Ok(())
    }
}
