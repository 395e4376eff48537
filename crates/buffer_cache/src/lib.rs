//! The sector buffer cache: a fixed-size associative cache of on-disk
//! sectors, sitting between the block device and everything that reads or
//! writes it (the directory layer, the inode layer).
#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::vec::Vec;
use core::fmt::Debug;

use fs_types::{BLOCK_SECTOR_SIZE, SectorNo};
use mutex_api::{Monitor, Mutex};
use once_init::OnceInit;
use strum::{Display, EnumIter};

/// Number of sectors the cache holds at once.
pub const NUM_SECTORS: usize = 64;

/// A block device addressable by [`SectorNo`], transferring whole sectors.
pub trait BlockDevice {
    type Error;

    fn read(&self, sector: SectorNo, buf: &mut [u8; BLOCK_SECTOR_SIZE]) -> Result<(), Self::Error>;
    fn write(&self, sector: SectorNo, buf: &[u8; BLOCK_SECTOR_SIZE]) -> Result<(), Self::Error>;
}

/// A partial transfer into or out of a cached sector.
pub enum Transfer<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl Transfer<'_> {
    fn is_write(&self) -> bool {
        matches!(self, Transfer::Write(_))
    }

    fn len(&self) -> usize {
        match self {
            Transfer::Read(b) => b.len(),
            Transfer::Write(b) => b.len(),
        }
    }
}

/// Lifecycle of one cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumIter, Display)]
pub enum SectorState {
    /// Unassigned; available for a miss to claim.
    #[default]
    Evicted,
    /// Holds valid data for `sector`; accessors may read or write it freely.
    Ready,
    /// A writeback has been requested but not yet begun.
    PendingWrite,
    /// A writeback is in flight.
    BeingWritten,
    /// A read from the device is in flight.
    BeingRead,
}

#[derive(Clone, Copy)]
struct SlotMeta {
    sector: Option<SectorNo>,
    state: SectorState,
    metadata: bool,
    dirty: bool,
    num_accessors: usize,
}

impl Default for SlotMeta {
    fn default() -> Self {
        Self {
            sector: None,
            state: SectorState::Evicted,
            metadata: false,
            dirty: false,
            num_accessors: 0,
        }
    }
}

/// Internal table state. Exposed only so callers can name a concrete
/// `Monitor<Data = Directory>` when instantiating [`BufferCache`]; its
/// fields are private.
pub struct Directory {
    metas: Vec<SlotMeta>,
}

/// Picks an eviction victim among slots with no accessor currently in flight,
/// preferring a non-dirty, non-metadata slot (both cost nothing to forget).
fn pick_victim(metas: &[SlotMeta]) -> Option<usize> {
    metas
        .iter()
        .enumerate()
        .filter(|(_, m)| m.state == SectorState::Ready && m.num_accessors == 0)
        .min_by_key(|(_, m)| (u8::from(m.dirty), u8::from(m.metadata)))
        .map(|(i, _)| i)
}

/// A slot's raw bytes. Exposed only so callers can name a concrete
/// `Mutex<Data = SlotBuf>`; its fields are private.
pub struct SlotBuf {
    data: [u8; BLOCK_SECTOR_SIZE],
}

/// The process-wide sector cache.
///
/// Generic over two independent lock domains, the same split the teacher's
/// block I/O cache makes between its buffer list and each buffer's data: a
/// `DirMonitor` guarding slot bookkeeping (which sector lives where, and in
/// what state) and a per-slot `BufMutex` guarding that slot's bytes. A thread
/// never holds more than one of these at a time, and never holds two
/// different slots' `BufMutex` at once: device I/O for one sector never
/// blocks bookkeeping for another.
pub struct BufferCache<Device, DirMonitor, BufMutex> {
    device: Device,
    dir: DirMonitor,
    bufs: OnceInit<Vec<BufMutex>>,
}

impl<Device, DirMonitor, BufMutex> BufferCache<Device, DirMonitor, BufMutex>
where
    DirMonitor: Monitor<Data = Directory>,
    BufMutex: Mutex<Data = SlotBuf>,
{
    #[must_use]
    pub fn new(device: Device) -> Self {
        Self {
            device,
            dir: DirMonitor::new(Directory { metas: Vec::new() }),
            bufs: OnceInit::new(),
        }
    }

    /// Allocates the fixed pool of [`NUM_SECTORS`] slots.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn init(&self) {
        let mut dir = self.dir.lock();
        assert!(dir.metas.is_empty(), "buffer cache already initialized");
        dir.metas = (0..NUM_SECTORS).map(|_| SlotMeta::default()).collect();
        drop(dir);
        self.bufs.init(
            (0..NUM_SECTORS)
                .map(|_| {
                    BufMutex::new(SlotBuf {
                        data: [0; BLOCK_SECTOR_SIZE],
                    })
                })
                .collect(),
        );
    }

    fn bufs(&self) -> &[BufMutex] {
        self.bufs.get()
    }

    /// The underlying device, for callers that need to perform operations
    /// the cache itself doesn't mediate (e.g. allocating a fresh sector).
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Finds or loads `sector`, blocking out any in-flight transition on it,
    /// and returns its slot index with the accessor count already
    /// incremented. Callers must pair this with [`Self::release`].
    fn acquire(&self, sector: SectorNo, is_metadata: bool) -> usize
    where
        Device: BlockDevice,
        Device::Error: Debug,
    {
        loop {
            let mut dir = self.dir.lock();

            if let Some(i) = dir.metas.iter().position(|m| m.sector == Some(sector)) {
                if dir.metas[i].state != SectorState::Ready {
                    // Re-search by sector after waking: this slot may have
                    // been evicted and reclaimed for a different sector
                    // while we were parked, so index `i` alone is stale.
                    let _ = self.dir.wait(dir);
                    continue;
                }
                dir.metas[i].num_accessors += 1;
                return i;
            }

            if let Some(i) = dir.metas.iter().position(|m| m.state == SectorState::Evicted) {
                dir.metas[i].sector = Some(sector);
                dir.metas[i].state = SectorState::BeingRead;
                dir.metas[i].metadata = is_metadata;
                drop(dir);

                self.device
                    .read(sector, &mut self.bufs()[i].lock().data)
                    .expect("block device read failed");

                let mut dir = self.dir.lock();
                dir.metas[i].state = SectorState::Ready;
                dir.metas[i].num_accessors += 1;
                self.dir.notify_all();
                return i;
            }

            if let Some(i) = pick_victim(&dir.metas) {
                let victim_sector = dir.metas[i].sector.expect("ready slot always has a sector");
                if dir.metas[i].dirty {
                    dir.metas[i].state = SectorState::PendingWrite;
                    drop(dir);
                    self.writeback(i, victim_sector);
                } else {
                    dir.metas[i] = SlotMeta::default();
                }
                // Loop again: the slot is now evicted (or another thread
                // may have grabbed it for `sector` itself in the meantime).
                continue;
            }

            // Cache full of in-flight or pinned slots: wait for one to free up.
            let _ = self.dir.wait(dir);
        }
    }

    /// Drives an already-`PendingWrite` slot through `BeingWritten` back to
    /// `Evicted`. `self.dir` must not be held on entry.
    fn writeback(&self, i: usize, sector: SectorNo)
    where
        Device: BlockDevice,
        Device::Error: Debug,
    {
        {
            let mut dir = self.dir.lock();
            dir.metas[i].state = SectorState::BeingWritten;
        }
        self.device
            .write(sector, &self.bufs()[i].lock().data)
            .expect("block device write failed");
        let mut dir = self.dir.lock();
        dir.metas[i] = SlotMeta::default();
        self.dir.notify_all();
    }

    fn release(&self, i: usize, dirtied: bool) {
        let mut dir = self.dir.lock();
        if dirtied {
            dir.metas[i].dirty = true;
        }
        dir.metas[i].num_accessors -= 1;
        self.dir.notify_all();
    }

    /// Reads or writes `transfer.len()` bytes at `offset` within `sector`,
    /// loading it first if necessary.
    ///
    /// # Panics
    ///
    /// Panics if `offset + transfer.len()` exceeds [`BLOCK_SECTOR_SIZE`], or
    /// if the underlying device I/O fails.
    pub fn io_at(&self, sector: SectorNo, offset: usize, transfer: Transfer<'_>, is_metadata: bool)
    where
        Device: BlockDevice,
        Device::Error: Debug,
    {
        assert!(offset + transfer.len() <= BLOCK_SECTOR_SIZE);
        let is_write = transfer.is_write();
        let i = self.acquire(sector, is_metadata);
        {
            let mut buf = self.bufs()[i].lock();
            match transfer {
                Transfer::Read(dst) => dst.copy_from_slice(&buf.data[offset..offset + dst.len()]),
                Transfer::Write(src) => buf.data[offset..offset + src.len()].copy_from_slice(src),
            }
        }
        self.release(i, is_write);
    }

    /// Like [`Self::io_at`], and afterward best-effort prefetches
    /// `sector_next`: it is loaded only if a slot is free without evicting
    /// anything, and any failure or contention is silently dropped. Never
    /// blocks on another thread's activity and never evicts the sector this
    /// call just touched.
    pub fn io_at_ahead(
        &self,
        sector: SectorNo,
        offset: usize,
        transfer: Transfer<'_>,
        is_metadata: bool,
        sector_next: SectorNo,
    ) where
        Device: BlockDevice,
        Device::Error: Debug,
    {
        self.io_at(sector, offset, transfer, is_metadata);
        self.try_read_ahead(sector_next);
    }

    fn try_read_ahead(&self, sector_next: SectorNo)
    where
        Device: BlockDevice,
        Device::Error: Debug,
    {
        let mut dir = self.dir.lock();
        if dir.metas.iter().any(|m| m.sector == Some(sector_next)) {
            return;
        }
        let Some(i) = dir.metas.iter().position(|m| m.state == SectorState::Evicted) else {
            return;
        };
        dir.metas[i].sector = Some(sector_next);
        dir.metas[i].state = SectorState::BeingRead;
        drop(dir);

        let result = self.device.read(sector_next, &mut self.bufs()[i].lock().data);

        let mut dir = self.dir.lock();
        if result.is_ok() {
            dir.metas[i].state = SectorState::Ready;
        } else {
            dir.metas[i] = SlotMeta::default();
        }
        self.dir.notify_all();
    }

    /// Synchronously flushes every dirty `Ready` slot to the device.
    /// Returns the number of sectors written.
    ///
    /// # Panics
    ///
    /// Panics if the underlying device I/O fails.
    pub fn write_all(&self) -> usize
    where
        Device: BlockDevice,
        Device::Error: Debug,
    {
        let mut flushed = 0;
        for i in 0..NUM_SECTORS {
            let mut dir = self.dir.lock();
            loop {
                match dir.metas[i].state {
                    SectorState::Evicted | SectorState::Ready => break,
                    _ => dir = self.dir.wait(dir),
                }
            }
            if dir.metas[i].state != SectorState::Ready || !dir.metas[i].dirty {
                continue;
            }
            let sector = dir.metas[i].sector.expect("ready slot always has a sector");
            dir.metas[i].state = SectorState::PendingWrite;
            drop(dir);
            self.writeback_clean(i, sector);
            flushed += 1;
        }
        flushed
    }

    /// Like [`Self::writeback`], but returns the slot to `Ready` (still
    /// holding `sector`) instead of `Evicted`: used by [`Self::write_all`],
    /// which flushes without displacing anything.
    fn writeback_clean(&self, i: usize, sector: SectorNo)
    where
        Device: BlockDevice,
        Device::Error: Debug,
    {
        {
            let mut dir = self.dir.lock();
            dir.metas[i].state = SectorState::BeingWritten;
        }
        self.device
            .write(sector, &self.bufs()[i].lock().data)
            .expect("block device write failed");
        let mut dir = self.dir.lock();
        dir.metas[i].dirty = false;
        dir.metas[i].state = SectorState::Ready;
        self.dir.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdLibMutex};

    use mutex_api::{StdMonitor, StdMutex};

    use super::*;

    #[derive(Debug)]
    struct DeviceError;

    struct MockDevice {
        disk: StdLibMutex<Vec<[u8; BLOCK_SECTOR_SIZE]>>,
        reads: StdLibMutex<usize>,
    }

    impl MockDevice {
        fn new(num_sectors: u32) -> Self {
            Self {
                disk: StdLibMutex::new(vec![[0u8; BLOCK_SECTOR_SIZE]; num_sectors as usize]),
                reads: StdLibMutex::new(0),
            }
        }
    }

    impl BlockDevice for MockDevice {
        type Error = DeviceError;

        fn read(&self, sector: SectorNo, buf: &mut [u8; BLOCK_SECTOR_SIZE]) -> Result<(), Self::Error> {
            *self.reads.lock().unwrap() += 1;
            *buf = self.disk.lock().unwrap()[sector.as_usize()];
            Ok(())
        }

        fn write(&self, sector: SectorNo, buf: &[u8; BLOCK_SECTOR_SIZE]) -> Result<(), Self::Error> {
            self.disk.lock().unwrap()[sector.as_usize()] = *buf;
            Ok(())
        }
    }

    type Cache = BufferCache<MockDevice, StdMonitor<Directory>, StdMutex<SlotBuf>>;

    fn new_cache(num_sectors: u32) -> Cache {
        let cache = BufferCache::new(MockDevice::new(num_sectors));
        cache.init();
        cache
    }

    fn read_byte(cache: &Cache, sector: SectorNo) -> u8 {
        let mut b = [0u8; 1];
        cache.io_at(sector, 0, Transfer::Read(&mut b), false);
        b[0]
    }

    fn write_byte(cache: &Cache, sector: SectorNo, b: u8) {
        cache.io_at(sector, 0, Transfer::Write(&[b]), false);
    }

    #[test]
    fn write_then_read_back_without_touching_device() {
        let cache = new_cache(4);
        write_byte(&cache, SectorNo::new(0), 7);
        assert_eq!(read_byte(&cache, SectorNo::new(0)), 7);
        assert_eq!(*cache.device.reads.lock().unwrap(), 0);
    }

    #[test]
    fn write_all_flushes_dirty_sectors_to_device() {
        let cache = new_cache(4);
        write_byte(&cache, SectorNo::new(0), 9);
        assert_eq!(cache.write_all(), 1);
        assert_eq!(cache.device.disk.lock().unwrap()[0][0], 9);
        // flushed slot stays cached and clean, so a second write_all is a no-op.
        assert_eq!(cache.write_all(), 0);
    }

    #[test]
    fn miss_loads_from_device_exactly_once_per_access() {
        let cache = new_cache(4);
        cache.device.disk.lock().unwrap()[2][0] = 42;
        assert_eq!(read_byte(&cache, SectorNo::new(2)), 42);
        assert_eq!(read_byte(&cache, SectorNo::new(2)), 42);
        assert_eq!(*cache.device.reads.lock().unwrap(), 1);
    }

    #[test]
    fn eviction_recycles_slots_once_pool_is_full() {
        let cache = new_cache(NUM_SECTORS as u32 + 1);
        for s in 0..NUM_SECTORS as u32 {
            write_byte(&cache, SectorNo::new(s), 1);
        }
        // every slot now holds a distinct dirty sector; one more miss must evict.
        write_byte(&cache, SectorNo::new(NUM_SECTORS as u32), 2);
        assert_eq!(read_byte(&cache, SectorNo::new(NUM_SECTORS as u32)), 2);
    }

    #[test]
    fn read_ahead_warms_the_next_sector_without_blocking_the_caller() {
        let cache = new_cache(4);
        cache.device.disk.lock().unwrap()[1][0] = 5;
        let mut b = [0u8; 1];
        cache.io_at_ahead(SectorNo::new(0), 0, Transfer::Read(&mut b), false, SectorNo::new(1));
        assert_eq!(*cache.device.reads.lock().unwrap(), 2);
        assert_eq!(read_byte(&cache, SectorNo::new(1)), 5);
        assert_eq!(*cache.device.reads.lock().unwrap(), 2, "already warm, no second read");
    }

    #[test]
    fn concurrent_accessors_see_consistent_writes() {
        let cache = Arc::new(new_cache(4));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    write_byte(&cache, SectorNo::new(0), 1);
                    let _ = read_byte(&cache, SectorNo::new(0));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(read_byte(&cache, SectorNo::new(0)), 1);
    }
}
