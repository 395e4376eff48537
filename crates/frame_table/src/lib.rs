//! The physical frame table: arbitrates a fixed pool of machine page frames
//! among virtual pages, with pinning and eviction.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{collections::VecDeque, vec::Vec};

use mutex_api::Mutex;

/// The external page layer's half of the frame/page back-reference.
///
/// A frame table is generic over this trait so it never needs to know how a
/// page is written back or unmapped; it only needs a yes/no answer.
pub trait PageOwner {
    /// Attempts to evict this page: write it back and unmap it if possible.
    ///
    /// Returns `false` to refuse eviction right now (the frame is left
    /// untouched); the frame table will try a different candidate.
    fn page_evict(&mut self) -> bool;
}

/// Opaque index identifying one frame in a [`FrameTable`].
///
/// Stable for the process lifetime: frames are never destroyed, only
/// recycled between [`FrameTable::free`] and [`FrameTable::alloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

impl FrameId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

struct Frame<P> {
    /// Kernel-visible address identifying the page. Immutable after
    /// construction.
    addr: usize,
    owner: Option<P>,
    pinned: bool,
}

/// Internal table state, parameterized by the page-owner type. Exposed only
/// so callers can name a concrete `Mutex<Data = Inner<P>>` when instantiating
/// [`FrameTable`]; its fields are private.
pub struct Inner<P> {
    frames: Vec<Frame<P>>,
    /// Stack of unused frames: `alloc` pops from the back, `free` pushes to
    /// the back, so reuse is most-recently-freed-first.
    free: Vec<FrameId>,
    /// Allocated frames in insertion order: eviction scans from the front
    /// (first-allocated-first-considered).
    allocated: VecDeque<FrameId>,
}

impl<P> Inner<P> {
    fn frame(&self, id: FrameId) -> &Frame<P> {
        &self.frames[id.0]
    }

    fn frame_mut(&mut self, id: FrameId) -> &mut Frame<P> {
        &mut self.frames[id.0]
    }

    /// Attempts to reclaim an already-allocated frame in place, leaving it
    /// member of neither `free` nor `allocated` on success. Only called
    /// while `table` is held, so this transient non-membership is never
    /// observed by another thread.
    fn try_evict(&mut self, id: FrameId) -> bool
    where
        P: PageOwner,
    {
        let frame = self.frame_mut(id);
        if frame.pinned {
            return false;
        }
        if let Some(owner) = &mut frame.owner {
            if !owner.page_evict() {
                return false;
            }
        }
        self.frame_mut(id).owner = None;
        if let Some(pos) = self.allocated.iter().position(|a| *a == id) {
            self.allocated.remove(pos);
        }
        true
    }
}

/// The process-wide singleton owning all frames.
///
/// Generic over the mutex guarding the table, the same way the teacher's
/// buffer cache is generic over its buffer-list mutex: production code wires
/// this to a spinlock, tests wire it to [`mutex_api::StdMutex`].
pub struct FrameTable<TableMutex> {
    table: TableMutex,
}

impl<TableMutex, P> FrameTable<TableMutex>
where
    TableMutex: Mutex<Data = Inner<P>>,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: TableMutex::new(Inner {
                frames: Vec::new(),
                free: Vec::new(),
                allocated: VecDeque::new(),
            }),
        }
    }

    /// Populates the table by draining the user page pool: one frame per
    /// address yielded by `addrs`.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn init(&self, addrs: impl IntoIterator<Item = usize>) {
        let mut inner = self.table.lock();
        assert!(inner.frames.is_empty(), "frame table already initialized");
        for addr in addrs {
            let id = FrameId(inner.frames.len());
            inner.frames.push(Frame {
                addr,
                owner: None,
                pinned: false,
            });
            inner.free.push(id);
        }
    }

    /// Returns the kernel-visible address of a frame.
    #[must_use]
    pub fn address(&self, id: FrameId) -> usize {
        self.table.lock().frame(id).addr
    }

    /// Records (or clears) which virtual page is currently installed in a
    /// frame. Call this after `alloc` once the caller has finished wiring
    /// the frame into the new page's mapping.
    pub fn set_owner(&self, id: FrameId, owner: Option<P>) {
        self.table.lock().frame_mut(id).owner = owner;
    }

    /// Returns a frame whose back-reference is cleared and whose pinned
    /// flag is set, inserted into `allocated`.
    ///
    /// # Panics
    ///
    /// Panics if no free frame exists and no allocated frame can be
    /// evicted: the pool is genuinely exhausted, which is a fatal
    /// out-of-memory condition for a fixed-size frame pool.
    pub fn alloc(&self) -> FrameId
    where
        P: PageOwner,
    {
        let mut inner = self.table.lock();

        if let Some(id) = inner.free.pop() {
            let frame = inner.frame_mut(id);
            frame.pinned = true;
            frame.owner = None;
            inner.allocated.push_back(id);
            return id;
        }

        let candidates: Vec<FrameId> = inner.allocated.iter().copied().collect();
        for id in candidates {
            if inner.try_evict(id) {
                let frame = inner.frame_mut(id);
                frame.pinned = true;
                frame.owner = None;
                inner.allocated.push_back(id);
                return id;
            }
        }

        panic!("frame table exhausted: no free frame and no frame could be evicted");
    }

    /// Releases a frame back to the free pool.
    pub fn free(&self, id: FrameId) {
        let mut inner = self.table.lock();
        if let Some(pos) = inner.allocated.iter().position(|a| *a == id) {
            inner.allocated.remove(pos);
        }
        let frame = inner.frame_mut(id);
        frame.owner = None;
        frame.pinned = false;
        inner.free.push(id);
    }

    /// Marks a frame ineligible for eviction.
    ///
    /// Boolean, not counted: a second `pin` is a no-op, and a single
    /// `unpin` clears it regardless of how many times `pin` was called.
    pub fn pin(&self, id: FrameId) {
        self.table.lock().frame_mut(id).pinned = true;
    }

    /// Clears a frame's pinned flag.
    pub fn unpin(&self, id: FrameId) {
        self.table.lock().frame_mut(id).pinned = false;
    }

    /// Attempts to reclaim an allocated frame in place.
    ///
    /// Fails (returns `false`, no state change) if the frame is pinned, or
    /// if the installed page refuses eviction. On success the frame's
    /// back-reference is cleared and it is removed from `allocated`; the
    /// caller decides what happens next (typically reinstalling it for a
    /// new owner, as `alloc`'s internal scan does).
    pub fn evict(&self, id: FrameId) -> bool
    where
        P: PageOwner,
    {
        self.table.lock().try_evict(id)
    }
}

impl<TableMutex, P> Default for FrameTable<TableMutex>
where
    TableMutex: Mutex<Data = Inner<P>>,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use mutex_api::StdMutex;

    use super::*;

    struct AlwaysEvict;
    impl PageOwner for AlwaysEvict {
        fn page_evict(&mut self) -> bool {
            true
        }
    }

    struct NeverEvict;
    impl PageOwner for NeverEvict {
        fn page_evict(&mut self) -> bool {
            false
        }
    }

    type Table<P> = FrameTable<StdMutex<Inner<P>>>;

    #[test]
    fn alloc_returns_pinned_frame_with_no_owner() {
        let table: Table<AlwaysEvict> = FrameTable::new();
        table.init(0..4);
        let id = table.alloc();
        assert!(table.table.lock().frame(id).pinned);
        assert!(table.table.lock().frame(id).owner.is_none());
    }

    #[test]
    fn free_returns_frame_to_pool_unpinned_and_ownerless() {
        let table: Table<AlwaysEvict> = FrameTable::new();
        table.init(0..2);
        let id = table.alloc();
        table.set_owner(id, Some(AlwaysEvict));
        table.free(id);
        let inner = table.table.lock();
        assert!(inner.free.contains(&id));
        assert!(!inner.allocated.contains(&id));
        assert!(!inner.frame(id).pinned);
        assert!(inner.frame(id).owner.is_none());
    }

    #[test]
    fn pin_pin_unpin_leaves_frame_unpinned() {
        let table: Table<AlwaysEvict> = FrameTable::new();
        table.init(0..1);
        let id = table.alloc();
        table.pin(id);
        table.pin(id);
        table.unpin(id);
        assert!(!table.table.lock().frame(id).pinned);
    }

    #[test]
    fn evict_refuses_pinned_frame() {
        let table: Table<AlwaysEvict> = FrameTable::new();
        table.init(0..1);
        let id = table.alloc();
        table.set_owner(id, Some(AlwaysEvict));
        // still pinned from alloc()
        assert!(!table.evict(id));
    }

    #[test]
    fn evict_refuses_when_owner_refuses() {
        let table: Table<NeverEvict> = FrameTable::new();
        table.init(0..1);
        let id = table.alloc();
        table.set_owner(id, Some(NeverEvict));
        table.unpin(id);
        assert!(!table.evict(id));
        assert!(table.table.lock().frame(id).owner.is_some());
    }

    #[test]
    fn alloc_evicts_when_pool_exhausted_and_frame_unpinned() {
        let table: Table<AlwaysEvict> = FrameTable::new();
        table.init(0..2);
        let a = table.alloc();
        let b = table.alloc();
        table.set_owner(a, Some(AlwaysEvict));
        table.set_owner(b, Some(AlwaysEvict));
        table.unpin(b);

        let c = table.alloc();
        assert_eq!(c, b, "the only unpinned frame should be recycled");
    }

    #[test]
    #[should_panic(expected = "frame table exhausted")]
    fn alloc_panics_when_all_frames_pinned() {
        let table: Table<AlwaysEvict> = FrameTable::new();
        table.init(0..2);
        let _a = table.alloc();
        let _b = table.alloc();
        // both remain pinned (fresh from alloc): pool is exhausted.
        let _c = table.alloc();
    }

    #[test]
    #[should_panic(expected = "already initialized")]
    fn init_twice_panics() {
        let table: Table<AlwaysEvict> = FrameTable::new();
        table.init(0..1);
        table.init(0..1);
    }

    #[test]
    fn addresses_are_distinct_and_stable() {
        let table: Table<AlwaysEvict> = FrameTable::new();
        table.init([0x1000, 0x2000, 0x3000]);
        let a = table.alloc();
        let b = table.alloc();
        assert_ne!(table.address(a), table.address(b));
        table.free(a);
        assert_eq!(table.address(a), 0x1000);
    }
}
