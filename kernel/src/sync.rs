//! The concrete lock implementation backing every generic structure in the
//! workspace.
//!
//! The core crates (`frame_table`, `buffer_cache`) are generic over
//! [`mutex_api::Mutex`]/[`mutex_api::Monitor`] so that a real kernel could
//! wire them to an interrupt-disabling spinlock. The scheduler, interrupts,
//! and MMU are out of scope here (spec §1), so this crate plays the role a
//! real kernel's bottom layer would: it supplies the host OS's own mutex and
//! condition variable as the one concrete lock the rest of the crate uses.

use mutex_api::{StdMonitor, StdMutex};

pub type FrameTable<P> = frame_table::FrameTable<StdMutex<frame_table::Inner<P>>>;
pub type BufferCache<Device> = buffer_cache::BufferCache<Device, StdMonitor<buffer_cache::Directory>, StdMutex<buffer_cache::SlotBuf>>;
