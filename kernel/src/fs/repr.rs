//! On-disk inode layout.
//!
//! The inode extent allocator is explicitly out of scope (spec §1); this
//! crate stands in for it with the simplest possible allocator a teaching
//! inode could have: a fixed array of direct block pointers, no indirect
//! blocks, no growth beyond that capacity.

use dataview::Pod;
use fs_types::SectorNo;

/// Number of direct data-block pointers an inode carries inline.
pub const DIRECT_BLOCKS: usize = 12;

const TYPE_FREE: u8 = 0;
const TYPE_FILE: u8 = 1;
const TYPE_DIR: u8 = 2;

/// The fixed-size on-disk record describing one inode, stored in the sector
/// matching its [`SectorNo`].
#[derive(Clone, Copy, Pod)]
#[repr(C)]
pub struct InodeDisk {
    ty: u8,
    _pad: [u8; 3],
    size: u32,
    blocks: [u32; DIRECT_BLOCKS],
}

impl InodeDisk {
    #[must_use]
    pub const fn free() -> Self {
        Self {
            ty: TYPE_FREE,
            _pad: [0; 3],
            size: 0,
            blocks: [0; DIRECT_BLOCKS],
        }
    }

    #[must_use]
    pub const fn new(is_dir: bool) -> Self {
        Self {
            ty: if is_dir { TYPE_DIR } else { TYPE_FILE },
            _pad: [0; 3],
            size: 0,
            blocks: [0; DIRECT_BLOCKS],
        }
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.ty == TYPE_DIR
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        self.ty == TYPE_FREE
    }

    pub fn mark_free(&mut self) {
        *self = Self::free();
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub fn set_size(&mut self, size: usize) {
        self.size = u32::try_from(size).expect("inode size exceeds u32 range");
    }

    #[must_use]
    pub fn block(&self, index: usize) -> Option<SectorNo> {
        let raw = self.blocks[index];
        (raw != 0).then(|| SectorNo::new(raw))
    }

    pub fn set_block(&mut self, index: usize, sector: SectorNo) {
        self.blocks[index] = sector.get();
    }
}
