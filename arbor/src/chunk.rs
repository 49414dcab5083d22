//! Chunk headers and the handles pointing at them.

use std::{borrow::Cow, fmt, panic::Location, ptr::NonNull};

use bitflags::bitflags;
use common::{newtype_key, slotmap::VersionKey};

use crate::{block::Block, error::Veto, heap::Heap, pool::PoolKey};

/// Alignment of every payload and of every span carved out of a pool.
pub const ALIGNMENT: usize = 16;
/// Default hard cap on the size of a single chunk.
pub const MAX_SIZE: usize = 0x1000_0000;
/// Shrinking a system backed chunk by less than this only changes its logical size.
pub const SHRINK_THRESHOLD: usize = 1024;
/// Maximum amount of parents walked by ancestry queries.
pub const MAX_DEPTH: usize = 10_000;

/// Round a size up to the next multiple of [`ALIGNMENT`].
pub const fn align_up(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

newtype_key! {
    pub(crate) struct ChunkKey(VersionKey);
}

/// A handle to a chunk allocated within a [`Heap`].
///
/// The handle carries the stamp of the heap which created it, so handing it to a different heap
/// is detected, as well as a version, so a handle to a freed chunk is detected even if the
/// header slot was reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId {
    pub(crate) stamp: u32,
    pub(crate) key: ChunkKey,
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use common::slotmap::SlotKey;
        write!(f, "ChunkId({}v{})", self.key.index(), self.key.version())
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
    pub(crate) struct ChunkFlags: u8 {
        /// Chunk owns a pool which its descendants are carved out of.
        const POOL = 0b0001;
        /// Chunk lives inside the block of a pool.
        const POOLMEM = 0b0010;
        /// Chunk is being torn down higher up in the current free.
        const LOOP = 0b0100;
        /// Chunk is a reference handle.
        const REFERENCE = 0b1000;
    }
}

/// A callback run before a chunk is freed. Returning an error vetoes the free.
pub type Destructor = Box<dyn FnMut(&mut Heap, ChunkId) -> Result<(), Veto>>;

pub(crate) enum DestructorSlot {
    Empty,
    /// The destructor was taken out of the chunk and is currently running.
    Running,
    Set(Destructor),
}

/// Where the payload of a chunk lives.
pub(crate) enum Storage {
    /// Zero sized payload, nothing allocated.
    Empty,
    /// A block from the system allocator.
    System(Block),
    /// A span within the block of a pool.
    Pooled {
        pool: PoolKey,
        offset: usize,
        span: usize,
    },
    /// The front of the block of the pool this chunk is the root of.
    PoolRoot(PoolKey),
}

#[repr(align(16))]
struct Aligned;

/// A well aligned pointer for payloads without any backing memory.
pub(crate) fn dangling_payload() -> NonNull<u8> {
    NonNull::<Aligned>::dangling().cast()
}

/// The header of a chunk.
pub(crate) struct Chunk {
    pub size: usize,
    pub flags: ChunkFlags,
    pub name: Cow<'static, str>,
    pub destructor: DestructorSlot,
    pub storage: Storage,
    pub parent: Option<ChunkId>,
    /// Newest child.
    pub child: Option<ChunkId>,
    pub next: Option<ChunkId>,
    pub prev: Option<ChunkId>,
    /// Reference handles keeping this chunk alive, newest last.
    pub refs: Vec<ChunkId>,
    /// The chunk kept alive if this chunk is a reference handle.
    pub target: Option<ChunkId>,
}

impl Chunk {
    pub fn new(size: usize, name: Cow<'static, str>, storage: Storage) -> Self {
        let flags = match storage {
            Storage::Pooled { .. } => ChunkFlags::POOLMEM,
            Storage::PoolRoot(_) => ChunkFlags::POOL,
            Storage::Empty | Storage::System(_) => ChunkFlags::empty(),
        };
        Chunk {
            size,
            flags,
            name,
            destructor: DestructorSlot::Empty,
            storage,
            parent: None,
            child: None,
            next: None,
            prev: None,
            refs: Vec::new(),
            target: None,
        }
    }

    pub fn is_reference(&self) -> bool {
        self.flags.contains(ChunkFlags::REFERENCE)
    }

    /// The pool new children of this chunk are carved out of, if any.
    pub fn pool(&self) -> Option<PoolKey> {
        match self.storage {
            Storage::PoolRoot(pool) | Storage::Pooled { pool, .. } => Some(pool),
            Storage::Empty | Storage::System(_) => None,
        }
    }
}

/// What is left of a chunk after it was freed.
pub(crate) struct Tombstone {
    pub name: Cow<'static, str>,
    pub freed_at: &'static Location<'static>,
}

#[cfg(test)]
mod test {
    use super::{align_up, dangling_payload, ALIGNMENT};

    #[test]
    fn align() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 16);
        assert_eq!(align_up(16), 16);
        assert_eq!(align_up(100), 112);
        assert_eq!(align_up(300), 304);
        assert_eq!(dangling_payload().as_ptr() as usize % ALIGNMENT, 0);
    }
}
