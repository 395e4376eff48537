//! On-disk data types shared by the directory layer and the inode layer.

use core::fmt;

use dataview::Pod;
use derive_more::{Display, From};

/// Size, in bytes, of one block-device sector and of the buffer cache's unit
/// of caching.
pub const BLOCK_SECTOR_SIZE: usize = 512;

/// Maximum length, in bytes, of one path component (excluding the
/// terminating NUL).
pub const NAME_MAX: usize = 14;

/// A sector number, used both to address the block device and to identify
/// an inode (an inode's identity *is* the sector its metadata lives in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, From, Display)]
#[repr(transparent)]
pub struct SectorNo(u32);

impl SectorNo {
    /// The sector that holds the filesystem root directory's inode.
    pub const ROOT: Self = Self(1);

    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// One slot of a directory's on-disk entry array.
///
/// Layout is a packed, fixed-width record: a sector-number field, a
/// NUL-padded name field of `NAME_MAX + 1` bytes, and a one-byte in-use
/// flag, followed by whatever trailing padding the target's natural
/// alignment requires (none, for the current field widths: `4 + 15 + 1` is
/// already a multiple of 4).
#[derive(Clone, Copy, Pod)]
#[repr(C)]
pub struct RawDirEntry {
    sector: u32,
    name: [u8; NAME_MAX + 1],
    in_use: u8,
}

impl fmt::Debug for RawDirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawDirEntry")
            .field("sector", &self.sector)
            .field("name", &self.name_bytes())
            .field("in_use", &self.is_in_use())
            .finish()
    }
}

impl RawDirEntry {
    /// A zeroed, not-in-use entry.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            sector: 0,
            name: [0; NAME_MAX + 1],
            in_use: 0,
        }
    }

    #[must_use]
    pub fn is_in_use(&self) -> bool {
        self.in_use != 0
    }

    #[must_use]
    pub fn sector(&self) -> SectorNo {
        SectorNo::new(self.sector)
    }

    /// Returns the name bytes up to (not including) the terminating NUL.
    #[must_use]
    pub fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        &self.name[..len]
    }

    /// Writes a new in-use entry.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty or longer than [`NAME_MAX`].
    pub fn set(&mut self, sector: SectorNo, name: &[u8]) {
        assert!(!name.is_empty() && name.len() <= NAME_MAX);
        self.sector = sector.get();
        self.name = [0; NAME_MAX + 1];
        self.name[..name.len()].copy_from_slice(name);
        self.in_use = 1;
    }

    /// Clears the in-use flag, leaving the sector/name bytes as tombstones
    /// (they are overwritten the next time this slot is reused).
    pub fn clear(&mut self) {
        self.in_use = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_dir_entry_is_fixed_size() {
        assert_eq!(size_of::<RawDirEntry>(), 4 + (NAME_MAX + 1) + 1);
    }

    #[test]
    fn set_and_read_back() {
        let mut de = RawDirEntry::empty();
        assert!(!de.is_in_use());
        de.set(SectorNo::new(42), b"hello");
        assert!(de.is_in_use());
        assert_eq!(de.sector(), SectorNo::new(42));
        assert_eq!(de.name_bytes(), b"hello");
    }

    #[test]
    fn clear_marks_not_in_use() {
        let mut de = RawDirEntry::empty();
        de.set(SectorNo::new(1), b"x");
        de.clear();
        assert!(!de.is_in_use());
    }
}
