//! The directory layer (spec §4.2): interprets certain inodes as ordered
//! arrays of name→sector entries, resolved under the owning inode's shared
//! lock.

use arrayvec::ArrayVec;
use fs_types::{NAME_MAX, RawDirEntry, SectorNo};

use super::inode::{Inode, InodeTable};

const ENTRY_SIZE: usize = size_of::<RawDirEntry>();
const DOT: usize = 0;
const DOT_DOT: usize = 1;

/// A handle over a directory-typed inode, plus a read cursor.
///
/// Multiple `Dir` handles may refer to the same underlying inode (via
/// [`Dir::reopen`]); they share that inode's lock but each keeps its own
/// cursor.
pub struct Dir {
    inode: Inode,
    inodes: InodeTable,
    cursor: usize,
}

fn read_entry(inode: &Inode, offset: usize) -> Option<RawDirEntry> {
    let mut entry = RawDirEntry::empty();
    let n = inode.read_at(offset, entry.as_bytes_mut());
    (n == ENTRY_SIZE).then_some(entry)
}

fn write_entry(inode: &Inode, offset: usize, entry: &RawDirEntry) -> bool {
    inode.write_at(offset, entry.as_bytes()).is_ok_and(|n| n == ENTRY_SIZE)
}

/// True iff `inode`, read as a directory, holds no entries besides `.`/`..`.
fn is_empty_dir(inode: &Inode) -> bool {
    let _guard = inode.lock();
    let mut offset = 2 * ENTRY_SIZE;
    while let Some(entry) = read_entry(inode, offset) {
        if entry.is_in_use() {
            return false;
        }
        offset += ENTRY_SIZE;
    }
    true
}

impl Dir {
    /// Creates an empty directory backed by a fresh inode at `sector`,
    /// with `.` and `..` both pointing at itself (the only directory this
    /// crate ever creates without a distinct parent is the filesystem
    /// root).
    #[must_use]
    pub fn create(inodes: &InodeTable, sector: SectorNo) -> Self {
        let inode = inodes.create(sector, true);
        let mut dot = RawDirEntry::empty();
        dot.set(sector, b".");
        let mut dot_dot = RawDirEntry::empty();
        dot_dot.set(sector, b"..");
        assert!(write_entry(&inode, DOT * ENTRY_SIZE, &dot));
        assert!(write_entry(&inode, DOT_DOT * ENTRY_SIZE, &dot_dot));
        Self {
            inode,
            inodes: inodes.clone(),
            cursor: 2 * ENTRY_SIZE,
        }
    }

    /// Takes ownership of `inode`, succeeding only if it is a directory.
    #[must_use]
    pub fn open(inodes: &InodeTable, inode: Inode) -> Option<Self> {
        if !inode.is_dir() {
            return None;
        }
        Some(Self {
            inode,
            inodes: inodes.clone(),
            cursor: 2 * ENTRY_SIZE,
        })
    }

    #[must_use]
    pub fn open_root(inodes: &InodeTable) -> Self {
        Self::open(inodes, inodes.open(SectorNo::ROOT)).expect("root sector must hold a directory")
    }

    /// Returns an independent handle to the same underlying inode, sharing
    /// its lock but starting its own cursor past `.`/`..`.
    #[must_use]
    pub fn reopen(&self) -> Self {
        Self {
            inode: self.inode.reopen(),
            inodes: self.inodes.clone(),
            cursor: 2 * ENTRY_SIZE,
        }
    }

    /// Returns the filepath's last component: everything after the final
    /// `/`, or the whole path if it contains none.
    #[must_use]
    pub fn parse_filename(path: &[u8]) -> &[u8] {
        match path.iter().rposition(|&b| b == b'/') {
            Some(i) => &path[i + 1..],
            None => path,
        }
    }

    /// Resolves all but the last component of `filepath`, returning a
    /// handle to the parent directory. Absolute paths start at root;
    /// relative paths start at `cwd`. Rejects a trailing `/`, any component
    /// longer than [`NAME_MAX`], and any component that fails to resolve.
    pub fn open_dirs(inodes: &InodeTable, cwd: Option<&Self>, filepath: &[u8]) -> Option<Self> {
        if filepath.ends_with(b"/") {
            return None;
        }

        let mut components = split_components(filepath)?;
        // The last component names the file/dir itself, not a directory to
        // descend into: stop one level early.
        components.pop()?;

        let mut dir = if filepath.first() == Some(&b'/') {
            Self::open_root(inodes)
        } else {
            cwd?.reopen()
        };

        for name in components {
            let next = dir.lookup(name)?;
            dir = Self::open(inodes, next)?;
        }
        Some(dir)
    }

    fn lookup_locked(&self, name: &[u8]) -> Option<(RawDirEntry, usize)> {
        let mut offset = 0;
        while let Some(entry) = read_entry(&self.inode, offset) {
            if entry.is_in_use() && entry.name_bytes() == name {
                return Some((entry, offset));
            }
            offset += ENTRY_SIZE;
        }
        None
    }

    /// Scans for `name`, returning an opened handle to its inode.
    #[must_use]
    pub fn lookup(&self, name: &[u8]) -> Option<Inode> {
        let _guard = self.inode.lock();
        let (entry, _) = self.lookup_locked(name)?;
        Some(self.inodes.open(entry.sector()))
    }

    /// Adds `name` → `sector`. Rejects empty/over-long names and duplicate
    /// names; otherwise reuses the first not-in-use slot or appends.
    #[must_use]
    pub fn add(&self, name: &[u8], sector: SectorNo) -> bool {
        if name.is_empty() || name.len() > NAME_MAX {
            return false;
        }
        let _guard = self.inode.lock();
        if self.lookup_locked(name).is_some() {
            return false;
        }

        let mut offset = 0;
        let target = loop {
            match read_entry(&self.inode, offset) {
                Some(entry) if entry.is_in_use() => offset += ENTRY_SIZE,
                _ => break offset,
            }
        };

        let mut entry = RawDirEntry::empty();
        entry.set(sector, name);
        write_entry(&self.inode, target, &entry)
    }

    /// Removes `name`. Refuses a directory entry unless it is singly open
    /// and contains no entries besides `.`/`..`.
    #[must_use]
    pub fn remove(&self, name: &[u8]) -> bool {
        if name == b"." || name == b".." {
            return false;
        }
        let _guard = self.inode.lock();
        let Some((entry, offset)) = self.lookup_locked(name) else {
            return false;
        };

        let target = self.inodes.open(entry.sector());
        if target.is_dir() && (target.open_count() != 1 || !is_empty_dir(&target)) {
            return false;
        }

        let mut cleared = RawDirEntry::empty();
        cleared.clear();
        if !write_entry(&self.inode, offset, &cleared) {
            return false;
        }
        target.delete();
        true
    }

    /// Advances the cursor and returns the next in-use entry's name.
    pub fn readdir(&mut self) -> Option<ArrayVec<u8, NAME_MAX>> {
        let _guard = self.inode.lock();
        loop {
            let entry = read_entry(&self.inode, self.cursor)?;
            self.cursor += ENTRY_SIZE;
            if entry.is_in_use() {
                let mut name = ArrayVec::new();
                name.try_extend_from_slice(entry.name_bytes()).expect("name fits NAME_MAX");
                return Some(name);
            }
        }
    }

    /// True iff the directory holds no entries besides `.`/`..`.
    #[must_use]
    pub fn empty(&self) -> bool {
        is_empty_dir(&self.inode)
    }
}

/// Splits a filepath into its `/`-separated components, rejecting any that
/// exceed [`NAME_MAX`]. Repeated `/` are collapsed (empty components are
/// dropped).
fn split_components(path: &[u8]) -> Option<Vec<&[u8]>> {
    let mut out = Vec::new();
    for part in path.split(|&b| b == b'/') {
        if part.is_empty() {
            continue;
        }
        if part.len() > NAME_MAX {
            return None;
        }
        out.push(part);
    }
    Some(out)
}
