use std::{
    borrow::Cow,
    fmt,
    panic::Location,
    ptr::NonNull,
    sync::atomic::{AtomicU32, Ordering},
};

use common::slotmap::{Lookup, SlotVec};

use crate::{
    block::Block,
    chunk::{
        dangling_payload, Chunk, ChunkId, ChunkKey, Destructor, DestructorSlot, Storage, Tombstone,
    },
    config::{Config, FatalHook, LogSink},
    error::{Error, Result, Veto, Violation},
    pool::{Pool, PoolKey},
};

/// Base of the stamps which mark handles as belonging to a specific heap.
const STAMP_MAGIC: u32 = 0xe814_ec70;

static NEXT_STAMP: AtomicU32 = AtomicU32::new(0);

/// Counters kept by a heap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Chunks currently alive, reference handles included.
    pub live_chunks: usize,
    /// Calls made into the system allocator to obtain or grow memory.
    pub system_allocs: usize,
    /// Blocks returned to the system allocator.
    pub system_frees: usize,
    /// Chunks carved out of a pool.
    pub pool_allocs: usize,
    /// Pools whose block is still allocated.
    pub live_pools: usize,
}

/// A tree of chunks where freeing a chunk frees all of its descendants.
///
/// The heap is single threaded: it is neither `Send` nor `Sync`, wrap it in a single lock if it
/// has to be shared.
pub struct Heap {
    stamp: u32,
    pub(crate) chunks: SlotVec<Chunk, ChunkKey, Tombstone>,
    pub(crate) pools: SlotVec<Pool, PoolKey>,
    pub(crate) config: Config,
    pub(crate) null_context: Option<ChunkId>,
    pub(crate) stats: Stats,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("config", &self.config)
            .field("null_context", &self.null_context)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let stamp = STAMP_MAGIC.wrapping_add(NEXT_STAMP.fetch_add(1, Ordering::Relaxed));
        let null_tracking = config.null_tracking;
        let mut heap = Heap {
            stamp,
            chunks: SlotVec::new(),
            pools: SlotVec::new(),
            config,
            null_context: None,
            stats: Stats::default(),
        };
        if null_tracking {
            heap.enable_null_tracking();
        }
        heap
    }

    pub fn set_fatal_hook<F>(&mut self, hook: F)
    where
        F: Fn(&Violation) + 'static,
    {
        let hook: FatalHook = Box::new(hook);
        self.config.fatal_hook = hook;
    }

    pub fn set_log_sink<F>(&mut self, sink: F)
    where
        F: Fn(&str) + 'static,
    {
        let sink: LogSink = Box::new(sink);
        self.config.log_sink = sink;
    }

    /// The chunk top level allocations are attached to, if null tracking is enabled.
    pub fn null_context(&self) -> Option<ChunkId> {
        self.null_context
    }

    /// Start attaching top level allocations to a `null_context` chunk.
    ///
    /// Chunks which are already top level stay where they are.
    pub fn enable_null_tracking(&mut self) -> ChunkId {
        if let Some(null) = self.null_context {
            return null;
        }
        let null = self.insert_chunk(Chunk::new(
            0,
            Cow::Borrowed("null_context"),
            Storage::Empty,
        ));
        self.null_context = Some(null);
        tracing::trace!(target: "arbor", ?null, "null tracking enabled");
        null
    }

    /// Move every child of the null context to the top level and free the null context.
    #[track_caller]
    pub fn disable_null_tracking(&mut self) {
        let Some(null) = self.null_context.take() else {
            return;
        };
        while let Some(child) = self.chunk(null).child {
            self.detach(child);
        }
        if let Err(e) = self.free_at(null, Location::caller()) {
            self.log(format_args!("could not free the null context: {e}"));
        }
        tracing::trace!(target: "arbor", "null tracking disabled");
    }

    pub fn stats(&self) -> Stats {
        Stats {
            live_chunks: self.chunks.len(),
            live_pools: self.pools.len(),
            ..self.stats
        }
    }

    /// Allocate a chunk of `size` bytes as the newest child of `ctx`.
    ///
    /// If `ctx` is a pool or lives in one, the chunk is carved out of that pool when it fits.
    /// Memory handed out from a pool may still hold the bytes of a previously freed chunk, use
    /// [`Heap::allocate_zeroed`] if that matters.
    pub fn allocate(
        &mut self,
        ctx: Option<ChunkId>,
        size: usize,
        name: impl Into<Cow<'static, str>>,
    ) -> Result<ChunkId> {
        self.allocate_internal(ctx, size, name.into(), false)
    }

    pub fn allocate_zeroed(
        &mut self,
        ctx: Option<ChunkId>,
        size: usize,
        name: impl Into<Cow<'static, str>>,
    ) -> Result<ChunkId> {
        self.allocate_internal(ctx, size, name.into(), true)
    }

    /// Allocate a chunk holding a copy of `data`.
    pub fn allocate_copy(
        &mut self,
        ctx: Option<ChunkId>,
        data: &[u8],
        name: impl Into<Cow<'static, str>>,
    ) -> Result<ChunkId> {
        let id = self.allocate_internal(ctx, data.len(), name.into(), false)?;
        self.bytes_mut(id).copy_from_slice(data);
        Ok(id)
    }

    /// Allocate room for `count` elements of `elem_size` bytes.
    pub fn allocate_array(
        &mut self,
        ctx: Option<ChunkId>,
        elem_size: usize,
        count: usize,
        name: impl Into<Cow<'static, str>>,
    ) -> Result<ChunkId> {
        let size = self.array_size(elem_size, count)?;
        self.allocate_internal(ctx, size, name.into(), false)
    }

    pub(crate) fn array_size(&self, elem_size: usize, count: usize) -> Result<usize> {
        elem_size.checked_mul(count).ok_or(Error::OverCap {
            requested: usize::MAX,
            max: self.config.max_size,
        })
    }

    pub(crate) fn check_size(&self, size: usize) -> Result<()> {
        if size > self.config.max_size {
            return Err(Error::OverCap {
                requested: size,
                max: self.config.max_size,
            });
        }
        Ok(())
    }

    pub(crate) fn allocate_internal(
        &mut self,
        ctx: Option<ChunkId>,
        size: usize,
        name: Cow<'static, str>,
        zeroed: bool,
    ) -> Result<ChunkId> {
        self.check_size(size)?;

        let parent = ctx.or(self.null_context);
        let pool = parent.and_then(|p| self.chunk(p).pool());

        let storage = match pool.and_then(|pool| self.pool_alloc(pool, size, zeroed)) {
            Some(storage) => storage,
            None if size == 0 => Storage::Empty,
            None => Storage::System(self.system_block(size)?),
        };

        let id = self.insert_chunk(Chunk::new(size, name, storage));
        self.attach(parent, id);
        Ok(id)
    }

    /// Obtain a fresh block from the system allocator.
    pub(crate) fn system_block(&mut self, size: usize) -> Result<Block> {
        let block = Block::new(size).ok_or(Error::OutOfMemory { size })?;
        self.stats.system_allocs += 1;
        Ok(block)
    }

    pub(crate) fn release_block(&mut self, block: Block) {
        drop(block);
        self.stats.system_frees += 1;
    }

    pub(crate) fn insert_chunk(&mut self, chunk: Chunk) -> ChunkId {
        let key = self.chunks.insert(chunk);
        ChunkId {
            stamp: self.stamp,
            key,
        }
    }

    /// Returns whether the handle points to a live chunk of this heap.
    pub fn is_live(&self, id: ChunkId) -> bool {
        self.try_chunk(id).is_some()
    }

    pub(crate) fn try_chunk(&self, id: ChunkId) -> Option<&Chunk> {
        if id.stamp != self.stamp {
            return None;
        }
        self.chunks.get(id.key)
    }

    /// Resolve a handle, reporting a violation if it does not point to a live chunk.
    #[track_caller]
    pub(crate) fn chunk(&self, id: ChunkId) -> &Chunk {
        match self.try_chunk(id) {
            Some(x) => x,
            None => self.invalid_handle(id),
        }
    }

    #[track_caller]
    pub(crate) fn chunk_mut(&mut self, id: ChunkId) -> &mut Chunk {
        if !self.is_live(id) {
            self.invalid_handle(id)
        }
        match self.chunks.get_mut(id.key) {
            Some(x) => x,
            None => unreachable!(),
        }
    }

    #[cold]
    #[track_caller]
    fn invalid_handle(&self, id: ChunkId) -> ! {
        if id.stamp != self.stamp {
            self.fatal(Violation::BadMagic { id })
        }
        let violation = match self.chunks.lookup(id.key) {
            Lookup::Retired(tomb) => Violation::AccessAfterFree {
                id,
                name: Some(tomb.name.clone()),
                freed_at: Some(tomb.freed_at),
            },
            Lookup::Stale => Violation::AccessAfterFree {
                id,
                name: None,
                freed_at: None,
            },
            Lookup::Missing | Lookup::Occupied(_) => Violation::BadMagic { id },
        };
        if let Violation::AccessAfterFree {
            freed_at: Some(at), ..
        } = violation
        {
            self.log(format_args!(
                "access after free error - first free may be at {at}"
            ));
        }
        self.fatal(violation)
    }

    /// Report a violation and stop.
    #[cold]
    pub(crate) fn fatal(&self, violation: Violation) -> ! {
        (self.config.fatal_hook)(&violation);
        panic!("{violation}")
    }

    pub(crate) fn log(&self, args: fmt::Arguments) {
        (self.config.log_sink)(&args.to_string())
    }

    pub(crate) fn pool(&self, key: PoolKey) -> &Pool {
        match self.pools.get(key) {
            Some(x) => x,
            None => panic!("chunk refers to a released pool"),
        }
    }

    pub(crate) fn pool_mut(&mut self, key: PoolKey) -> &mut Pool {
        match self.pools.get_mut(key) {
            Some(x) => x,
            None => panic!("chunk refers to a released pool"),
        }
    }

    /// The payload of a chunk.
    pub fn bytes(&self, id: ChunkId) -> &[u8] {
        let chunk = self.chunk(id);
        let size = chunk.size;
        match chunk.storage {
            Storage::Empty => &[],
            Storage::System(ref block) => &block.as_slice()[..size],
            Storage::Pooled { pool, offset, .. } => {
                &self.pool(pool).block.as_slice()[offset..offset + size]
            }
            Storage::PoolRoot(pool) => &self.pool(pool).block.as_slice()[..size],
        }
    }

    /// The payload of a chunk.
    pub fn bytes_mut(&mut self, id: ChunkId) -> &mut [u8] {
        if !self.is_live(id) {
            self.invalid_handle(id)
        }
        let Heap { chunks, pools, .. } = self;
        let Some(chunk) = chunks.get_mut(id.key) else {
            unreachable!()
        };
        let size = chunk.size;
        let (pool, start) = match chunk.storage {
            Storage::Empty => return &mut [],
            Storage::System(ref mut block) => return &mut block.as_mut_slice()[..size],
            Storage::Pooled { pool, offset, .. } => (pool, offset),
            Storage::PoolRoot(pool) => (pool, 0),
        };
        match pools.get_mut(pool) {
            Some(pool) => &mut pool.block.as_mut_slice()[start..start + size],
            None => panic!("chunk refers to a released pool"),
        }
    }

    /// Address of the payload of a chunk, always aligned to [`ALIGNMENT`](crate::ALIGNMENT).
    ///
    /// The address stays valid until the chunk is freed or resized.
    pub fn payload_ptr(&self, id: ChunkId) -> NonNull<u8> {
        let chunk = self.chunk(id);
        match chunk.storage {
            Storage::Empty => dangling_payload(),
            Storage::System(ref block) => block.as_ptr(),
            // Safety: offset is within the block of the pool.
            Storage::Pooled { pool, offset, .. } => unsafe {
                NonNull::new_unchecked(self.pool(pool).block.as_ptr().as_ptr().add(offset))
            },
            Storage::PoolRoot(pool) => self.pool(pool).block.as_ptr(),
        }
    }

    /// Install the destructor of a chunk, replacing any previous one.
    ///
    /// The destructor runs right before the chunk and its children are freed. Returning
    /// [`Veto`](crate::Veto) keeps the chunk and its whole subtree alive and makes the free fail.
    /// Setting a destructor while the current one is running replaces it once it returns.
    pub fn set_destructor<F>(&mut self, id: ChunkId, destructor: F)
    where
        F: FnMut(&mut Heap, ChunkId) -> Result<(), Veto> + 'static,
    {
        let destructor: Destructor = Box::new(destructor);
        self.chunk_mut(id).destructor = DestructorSlot::Set(destructor);
    }

    pub fn clear_destructor(&mut self, id: ChunkId) {
        self.chunk_mut(id).destructor = DestructorSlot::Empty;
    }

    pub fn has_destructor(&self, id: ChunkId) -> bool {
        !matches!(self.chunk(id).destructor, DestructorSlot::Empty)
    }
}
