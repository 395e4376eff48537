//! The file system: inodes and the directories built on top of them.
//!
//! Two layers:
//!   + Inodes ([`inode`]): reference-counted, lockable handles over fixed-
//!     layout on-disk records ([`repr`]), backed by the shared buffer cache.
//!   + Directories ([`directory`]): inodes interpreted as name→sector
//!     arrays, plus path resolution.
//!
//! The block device driver and the inode extent allocator are out of scope
//! here; [`mem_disk`] stands in for both with the simplest possible
//! in-memory implementation.

use std::sync::Arc;

pub mod directory;
pub mod inode;
pub mod mem_disk;
pub mod repr;

pub use directory::Dir;
pub use inode::{Inode, InodeTable};
pub use mem_disk::MemDisk;

/// The buffer cache instantiated over this crate's one block device.
pub type Cache = crate::sync::BufferCache<MemDisk>;

/// Formats a fresh filesystem on `disk`: a root directory whose `.` and
/// `..` both point at [`fs_types::SectorNo::ROOT`].
#[must_use]
pub fn format(disk: MemDisk) -> (Arc<Cache>, InodeTable) {
    let cache = Arc::new(Cache::new(disk));
    cache.init();
    let inodes = InodeTable::new(Arc::clone(&cache));
    Dir::create(&inodes, fs_types::SectorNo::ROOT);
    (cache, inodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_fs() -> (Arc<Cache>, InodeTable) {
        format(MemDisk::new(64, 2))
    }

    #[test]
    fn root_exists_and_is_empty() {
        let (_cache, inodes) = new_fs();
        let root = Dir::open_root(&inodes);
        assert!(root.empty());
    }

    #[test]
    fn create_add_lookup_remove_roundtrip() {
        let (_cache, inodes) = new_fs();
        let root = Dir::open_root(&inodes);

        let file_sector = inodes.create(fs_types::SectorNo::new(10), false).sector();
        assert!(root.add(b"hello.txt", file_sector));
        assert!(!root.empty());

        let found = root.lookup(b"hello.txt").expect("just added");
        assert_eq!(found.sector(), file_sector);

        assert!(root.remove(b"hello.txt"));
        assert!(root.lookup(b"hello.txt").is_none());
    }

    #[test]
    fn add_rejects_duplicate_and_over_long_names() {
        let (_cache, inodes) = new_fs();
        let root = Dir::open_root(&inodes);
        let a = inodes.create(fs_types::SectorNo::new(10), false).sector();
        let b = inodes.create(fs_types::SectorNo::new(11), false).sector();

        assert!(root.add(b"a", a));
        assert!(!root.add(b"a", b));
        assert!(!root.add(b"this-name-is-too-long", b));
    }

    #[test]
    fn remove_refuses_nonempty_directory() {
        let (_cache, inodes) = new_fs();
        let root = Dir::open_root(&inodes);
        let sub_sector = fs_types::SectorNo::new(10);
        let sub = Dir::create(&inodes, sub_sector);
        assert!(root.add(b"sub", sub_sector));

        let inner_sector = inodes.create(fs_types::SectorNo::new(11), false).sector();
        assert!(sub.add(b"inner", inner_sector));

        assert!(!root.remove(b"sub"));
        assert!(sub.remove(b"inner"));
        assert!(root.remove(b"sub"));
    }

    #[test]
    fn open_dirs_resolves_absolute_path() {
        let (_cache, inodes) = new_fs();
        let root = Dir::open_root(&inodes);
        let sub_sector = fs_types::SectorNo::new(10);
        Dir::create(&inodes, sub_sector);
        assert!(root.add(b"sub", sub_sector));

        let resolved = Dir::open_dirs(&inodes, None, b"/sub/file.txt").expect("sub exists");
        assert_eq!(resolved.lookup(b".").map(|i| i.sector()), Some(sub_sector));
    }

    #[test]
    fn open_dirs_rejects_trailing_slash_and_missing_component() {
        let (_cache, inodes) = new_fs();
        assert!(Dir::open_dirs(&inodes, None, b"/sub/").is_none());
        assert!(Dir::open_dirs(&inodes, None, b"/missing/file.txt").is_none());
    }
}
