//! A minimal host-level filesystem built from the frame table and buffer
//! cache crates: the concrete lock (`sync`), the inode/directory layers
//! (`fs`), and a thread-local current working directory standing in for a
//! process's `cwd` field, since the scheduler and process table are out of
//! scope here.

pub mod error;
pub mod fs;
pub mod sync;

use std::cell::RefCell;

use once_init::OnceInit;

struct Filesystem {
    inodes: fs::InodeTable,
}

static FILESYSTEM: OnceInit<Filesystem> = OnceInit::new();

/// Formats `disk` and installs it as the process-wide filesystem.
///
/// # Panics
///
/// Panics if a filesystem has already been mounted.
pub fn mount(disk: fs::MemDisk) {
    let (_cache, inodes) = fs::format(disk);
    FILESYSTEM.init(Filesystem { inodes });
}

/// The process-wide open-inode table.
///
/// # Panics
///
/// Panics if [`mount`] has not been called.
pub fn inodes() -> &'static fs::InodeTable {
    &FILESYSTEM.get().inodes
}

thread_local! {
    static CWD: RefCell<Option<fs::Dir>> = const { RefCell::new(None) };
}

/// Runs `f` with the calling thread's current working directory, defaulting
/// to the filesystem root the first time a thread asks.
pub fn with_cwd<R>(f: impl FnOnce(&fs::Dir) -> R) -> R {
    CWD.with(|cwd| {
        let mut cwd = cwd.borrow_mut();
        if cwd.is_none() {
            *cwd = Some(fs::Dir::open_root(inodes()));
        }
        f(cwd.as_ref().expect("just initialized"))
    })
}

/// Sets the calling thread's current working directory.
pub fn set_cwd(dir: fs::Dir) {
    CWD.with(|cwd| *cwd.borrow_mut() = Some(dir));
}

#[cfg(test)]
mod tests {
    use std::sync::Once;

    use super::*;

    static INIT: Once = Once::new();

    fn ensure_mounted() {
        INIT.call_once(|| mount(fs::MemDisk::new(64, 2)));
    }

    #[test]
    fn with_cwd_defaults_to_root() {
        ensure_mounted();
        with_cwd(|dir| assert!(dir.empty()));
    }

    #[test]
    fn set_cwd_is_thread_local() {
        ensure_mounted();
        let sub_sector = fs_types::SectorNo::new(20);
        with_cwd(|root| {
            fs::Dir::create(inodes(), sub_sector);
            assert!(root.add(b"sub", sub_sector));
        });

        let sub = with_cwd(|root| fs::Dir::open(inodes(), root.lookup(b"sub").unwrap()).unwrap());
        set_cwd(sub);
        with_cwd(|dir| assert!(dir.empty()));

        std::thread::spawn(|| {
            with_cwd(|dir| assert!(!dir.empty()));
        })
        .join()
        .unwrap();
    }
}
