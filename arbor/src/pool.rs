//! Pools, blocks reserved up front which the descendants of a chunk are bump allocated from.
//!
//! The pool keeps a count of the chunks carved out of it plus one for the root while the root
//! is alive. The block is returned to the system once that count reaches zero, which may be long
//! after the root itself was freed.

use std::borrow::Cow;

use common::{
    newtype_key,
    slotmap::VersionKey,
    tassert,
};

use crate::{
    block::Block,
    chunk::{align_up, Chunk, ChunkId, Storage},
    error::{Error, Result, Violation},
    heap::Heap,
};

newtype_key! {
    pub(crate) struct PoolKey(VersionKey);
}

pub(crate) struct Pool {
    pub block: Block,
    /// Start of the bump region, directly after the payload of the root.
    pub base: usize,
    /// End of the used part of the bump region.
    pub cursor: usize,
    pub object_count: usize,
    pub root_live: bool,
}

impl Pool {
    pub fn space_left(&self) -> usize {
        self.block.capacity() - self.cursor
    }
}

/// Occupancy of a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolUsage {
    /// Live chunks in the pool, plus one for the root if it is still alive.
    pub object_count: usize,
    /// Bytes between the start of the bump region and the cursor.
    pub used: usize,
    /// Size of the bump region. This is the requested reserve rounded up to a multiple of
    /// [`ALIGNMENT`](crate::ALIGNMENT); a pool with neither a root payload nor a reserve still
    /// gets one `ALIGNMENT` sized region.
    pub capacity: usize,
}

/// The span a chunk of the given size occupies within a pool.
pub(crate) fn span_for(size: usize) -> usize {
    align_up(size.max(1))
}

impl Heap {
    /// Allocate a pool with `reserve` bytes for its descendants.
    ///
    /// The reserve is rounded up to a multiple of [`ALIGNMENT`](crate::ALIGNMENT), see
    /// [`PoolUsage::capacity`].
    pub fn allocate_pool(&mut self, ctx: Option<ChunkId>, reserve: usize) -> Result<ChunkId> {
        self.allocate_pooled_object(ctx, 0, reserve, "pool")
    }

    /// Allocate a pool whose root has a payload of `size` bytes, with `reserve` bytes for its
    /// descendants behind it.
    pub fn allocate_pooled_object(
        &mut self,
        ctx: Option<ChunkId>,
        size: usize,
        reserve: usize,
        name: impl Into<Cow<'static, str>>,
    ) -> Result<ChunkId> {
        self.check_size(size)?;
        let base = align_up(size);
        let total = base.checked_add(reserve).ok_or(Error::OverCap {
            requested: usize::MAX,
            max: self.config.max_size,
        })?;

        let parent = ctx.or(self.null_context);
        let block = self.system_block(total)?;
        let pool = self.pools.insert(Pool {
            block,
            base,
            cursor: base,
            object_count: 1,
            root_live: true,
        });
        let id = self.insert_chunk(Chunk::new(size, name.into(), Storage::PoolRoot(pool)));
        self.attach(parent, id);
        tracing::trace!(target: "arbor", ?id, size, reserve, "pool created");
        Ok(id)
    }

    /// Carve a span for a chunk of `size` bytes out of a pool.
    /// Returns `None` if the pool does not have enough room left.
    pub(crate) fn pool_alloc(&mut self, key: PoolKey, size: usize, zeroed: bool) -> Option<Storage> {
        let span = span_for(size);
        let pool = self.pool_mut(key);
        if pool.space_left() < span {
            return None;
        }
        let offset = pool.cursor;
        pool.cursor += span;
        pool.object_count += 1;
        if zeroed {
            pool.block.as_mut_slice()[offset..offset + span].fill(0);
        }
        self.stats.pool_allocs += 1;
        Some(Storage::Pooled {
            pool: key,
            offset,
            span,
        })
    }

    /// Return the span of a freed member to its pool.
    pub(crate) fn pool_free(&mut self, id: ChunkId, key: PoolKey, offset: usize, span: usize) {
        if self.pool(key).object_count == 0 {
            self.fatal(Violation::PoolUnderflow { id })
        }
        let pool = self.pool_mut(key);
        pool.object_count -= 1;

        if pool.object_count == 1 && pool.root_live {
            // Only the root is left.
            pool.cursor = pool.base;
        } else if pool.object_count == 0 {
            self.release_pool(key);
        } else if offset + span == pool.cursor {
            pool.cursor = offset;
        }
    }

    /// The root of a pool was freed.
    pub(crate) fn pool_release_root(&mut self, id: ChunkId, key: PoolKey) {
        if self.pool(key).object_count == 0 {
            self.fatal(Violation::PoolUnderflow { id })
        }
        let pool = self.pool_mut(key);
        tassert!(pool.root_live);
        pool.object_count -= 1;
        pool.root_live = false;
        if pool.object_count == 0 {
            self.release_pool(key);
        } else {
            tracing::trace!(
                target: "arbor",
                ?id,
                remaining = pool.object_count,
                "pool root freed with live members"
            );
        }
    }

    fn release_pool(&mut self, key: PoolKey) {
        let Some(pool) = self.pools.remove(key, ()) else {
            return;
        };
        tracing::debug!(
            target: "arbor",
            capacity = pool.block.capacity(),
            "pool released"
        );
        self.release_block(pool.block);
    }

    /// Occupancy of the pool a chunk is the root or a member of.
    pub fn pool_usage(&self, id: ChunkId) -> Option<PoolUsage> {
        let pool = self.pool(self.chunk(id).pool()?);
        Some(PoolUsage {
            object_count: pool.object_count,
            used: pool.cursor - pool.base,
            capacity: pool.block.capacity() - pool.base,
        })
    }
}
