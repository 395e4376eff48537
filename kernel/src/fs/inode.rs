//! The inode layer (spec §6, "to the inode layer"): opens/closes inodes and
//! exposes `read_at`/`write_at`/`is_dir`/`open_count`/a per-directory lock
//! handle, grounded in the teacher's reference-counted `inode_get`/
//! `inode_put` table in `kernel/src/fs/mod.rs`.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdLibMutex},
};

use buffer_cache::Transfer;
use dataview::PodMethods as _;
use fs_types::{BLOCK_SECTOR_SIZE, SectorNo};
use mutex_api::{Mutex, StdMutex};

use super::{Cache, repr::InodeDisk};
use crate::error::Error;

/// Per-inode state shared by every open handle to the same sector: the open
/// count, and a separate "per-inode lock" that §4.2 requires directory
/// operations to hold for their entire critical section. Kept as two
/// distinct mutexes rather than one dual-purpose field: directory operations
/// hold `dir_lock` across calls that themselves take the table-wide map lock
/// (via [`InodeTable::open`]), and `open_count` is taken only briefly, inside
/// that same map lock, by `open`/`reopen`/`Drop`. Folding the two together
/// would let a directory operation's held lock and `Drop`'s held lock be the
/// same mutex acquired in opposite orders relative to the map lock.
struct Shared {
    sector: SectorNo,
    open_count: StdMutex<usize>,
    dir_lock: StdMutex<()>,
}

struct TableInner {
    cache: Arc<Cache>,
    open: StdLibMutex<HashMap<SectorNo, Arc<Shared>>>,
}

/// The process-wide table of currently-open inodes.
#[derive(Clone)]
pub struct InodeTable {
    inner: Arc<TableInner>,
}

impl InodeTable {
    #[must_use]
    pub fn new(cache: Arc<Cache>) -> Self {
        Self {
            inner: Arc::new(TableInner {
                cache,
                open: StdLibMutex::new(HashMap::new()),
            }),
        }
    }

    /// Creates a fresh inode at `sector`, overwriting whatever was there.
    #[must_use]
    pub fn create(&self, sector: SectorNo, is_dir: bool) -> Inode {
        self.write_disk(sector, &InodeDisk::new(is_dir));
        self.open(sector)
    }

    /// Opens (or reopens, if already open) the inode at `sector`.
    ///
    /// Look-up-or-create and the open-count increment happen under the same
    /// table-wide lock as [`Inode`]'s `Drop`, so a concurrent close can
    /// never remove the entry between this finding it and bumping its
    /// count: the two operations are mutually exclusive at table
    /// granularity rather than raced at shared-inode granularity.
    #[must_use]
    pub fn open(&self, sector: SectorNo) -> Inode {
        let mut open = self.inner.open.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let shared = open.entry(sector).or_insert_with(|| {
            Arc::new(Shared {
                sector,
                open_count: StdMutex::new(0),
                dir_lock: StdMutex::new(()),
            })
        });
        *shared.open_count.lock() += 1;
        let shared = Arc::clone(shared);
        drop(open);
        Inode {
            table: self.clone(),
            shared,
        }
    }

    fn read_disk(&self, sector: SectorNo) -> InodeDisk {
        let mut disk = InodeDisk::free();
        self.inner.cache.io_at(sector, 0, Transfer::Read(disk.as_bytes_mut()), true);
        disk
    }

    fn write_disk(&self, sector: SectorNo, disk: &InodeDisk) {
        self.inner.cache.io_at(sector, 0, Transfer::Write(disk.as_bytes()), true);
    }
}

/// One open handle to an inode. Cloned by `reopen`; each clone's `close`
/// decrements the shared open count independently.
pub struct Inode {
    table: InodeTable,
    shared: Arc<Shared>,
}

impl Inode {
    #[must_use]
    pub fn sector(&self) -> SectorNo {
        self.shared.sector
    }

    /// Returns a new handle to the same inode, incrementing its open count.
    #[must_use]
    pub fn reopen(&self) -> Self {
        *self.shared.open_count.lock() += 1;
        Self {
            table: self.table.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Acquires this inode's directory lock: the "per-inode lock" directory
    /// operations serialize on, independent of the open count. Held for the
    /// duration of the guard.
    pub(super) fn lock(&self) -> mutex_api::StdMutexGuard<'_, ()> {
        self.shared.dir_lock.lock()
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        *self.shared.open_count.lock()
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.table.read_disk(self.shared.sector).is_dir()
    }

    /// Marks the inode's disk record free. Called by the directory layer
    /// once `remove`'s preconditions (empty, singly-open) are confirmed; the
    /// caller must already hold this inode's lock.
    pub(super) fn delete(&self) {
        self.table.write_disk(self.shared.sector, &InodeDisk::free());
    }

    fn block_sector(&self, disk: &mut InodeDisk, block_index: usize, grow: bool) -> Option<SectorNo> {
        if let Some(s) = disk.block(block_index) {
            return Some(s);
        }
        if !grow {
            return None;
        }
        let sector = self.table.inner.cache.device().alloc_sector();
        disk.set_block(block_index, sector);
        Some(sector)
    }

    /// Reads up to `buf.len()` bytes starting at `offset`. Returns the
    /// number of bytes actually read, which is short at end of file (spec
    /// §7, "I/O partial").
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let disk = self.table.read_disk(self.shared.sector);
        let end = disk.size().min(offset.saturating_add(buf.len()));
        if offset >= end {
            return 0;
        }
        let mut done = 0;
        let mut disk = disk;
        while offset + done < end {
            let pos = offset + done;
            let block_index = pos / BLOCK_SECTOR_SIZE;
            let in_block = pos % BLOCK_SECTOR_SIZE;
            let chunk = (end - pos).min(BLOCK_SECTOR_SIZE - in_block);
            let Some(sector) = self.block_sector(&mut disk, block_index, false) else {
                break;
            };
            self.table
                .inner
                .cache
                .io_at(sector, in_block, Transfer::Read(&mut buf[done..done + chunk]), false);
            done += chunk;
        }
        done
    }

    /// Writes `buf` at `offset`, growing the inode and allocating new direct
    /// blocks as needed, and updates the on-disk size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileTooLarge`] if the write would need a block index
    /// beyond [`super::repr::DIRECT_BLOCKS`].
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, Error> {
        let mut disk = self.table.read_disk(self.shared.sector);
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done;
            let block_index = pos / BLOCK_SECTOR_SIZE;
            if block_index >= super::repr::DIRECT_BLOCKS {
                return Err(Error::FileTooLarge);
            }
            let in_block = pos % BLOCK_SECTOR_SIZE;
            let chunk = (buf.len() - done).min(BLOCK_SECTOR_SIZE - in_block);
            let sector = self
                .block_sector(&mut disk, block_index, true)
                .expect("grow=true always yields a sector");
            self.table
                .inner
                .cache
                .io_at(sector, in_block, Transfer::Write(&buf[done..done + chunk]), false);
            done += chunk;
        }
        if offset + done > disk.size() {
            disk.set_size(offset + done);
        }
        self.table.write_disk(self.shared.sector, &disk);
        Ok(done)
    }
}

impl Clone for Inode {
    fn clone(&self) -> Self {
        self.reopen()
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        let mut open = self
            .table
            .inner
            .open
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut count = self.shared.open_count.lock();
        *count -= 1;
        if *count == 0 {
            drop(count);
            open.remove(&self.shared.sector);
        }
    }
}
