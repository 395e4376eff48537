//! An in-memory block device.
//!
//! The block device driver is explicitly out of scope (spec §1). The
//! teacher never exercises its own `virtio_disk` in tests either — every
//! `block_io`/buffer-cache test in the pack drives a mock device — so an
//! in-memory mock, promoted from test fixture to the crate's only
//! implementation, is the teacher's own idiom.

use std::sync::Mutex;

use buffer_cache::BlockDevice;
use fs_types::{BLOCK_SECTOR_SIZE, SectorNo};

#[derive(Debug, thiserror::Error)]
#[error("sector {0:?} out of range")]
pub struct OutOfRange(SectorNo);

pub struct MemDisk {
    sectors: Mutex<Vec<[u8; BLOCK_SECTOR_SIZE]>>,
    next_free: Mutex<u32>,
}

impl MemDisk {
    /// Creates a disk of `num_sectors` zeroed sectors. Sector 0 is reserved
    /// (unused by this crate); allocation of fresh data/metadata sectors
    /// starts at `first_free`.
    #[must_use]
    pub fn new(num_sectors: u32, first_free: u32) -> Self {
        Self {
            sectors: Mutex::new(vec![[0; BLOCK_SECTOR_SIZE]; num_sectors as usize]),
            next_free: Mutex::new(first_free),
        }
    }

    /// Bump-allocates the next unused sector. Stands in for the inode extent
    /// allocator, which is out of scope (spec §1): this crate only needs
    /// *some* way to hand out fresh sectors for inode records and directory
    /// data blocks, not a reusable/free-list allocator.
    ///
    /// # Panics
    ///
    /// Panics if the disk is exhausted.
    pub fn alloc_sector(&self) -> SectorNo {
        let mut next = self.next_free.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let sector = SectorNo::new(*next);
        assert!((sector.as_usize()) < self.sectors.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len(), "disk exhausted");
        *next += 1;
        sector
    }
}

impl BlockDevice for MemDisk {
    type Error = OutOfRange;

    fn read(&self, sector: SectorNo, buf: &mut [u8; BLOCK_SECTOR_SIZE]) -> Result<(), Self::Error> {
        let sectors = self.sectors.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *buf = *sectors.get(sector.as_usize()).ok_or(OutOfRange(sector))?;
        Ok(())
    }

    fn write(&self, sector: SectorNo, buf: &[u8; BLOCK_SECTOR_SIZE]) -> Result<(), Self::Error> {
        let mut sectors = self.sectors.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *sectors.get_mut(sector.as_usize()).ok_or(OutOfRange(sector))? = *buf;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let disk = MemDisk::new(4, 1);
        let mut buf = [0; BLOCK_SECTOR_SIZE];
        buf[0] = 7;
        disk.write(SectorNo::new(0), &buf).unwrap();
        let mut out = [0; BLOCK_SECTOR_SIZE];
        disk.read(SectorNo::new(0), &mut out).unwrap();
        assert_eq!(out[0], 7);
    }

    #[test]
    fn alloc_sector_increments() {
        let disk = MemDisk::new(4, 1);
        assert_eq!(disk.alloc_sector(), SectorNo::new(1));
        assert_eq!(disk.alloc_sector(), SectorNo::new(2));
    }
}
