//! Growing and shrinking chunks.
//!
//! A handle survives a resize, only the storage behind it may move. Pool members try to stay in
//! their pool: shrinking is done in place, the newest member can grow into the free tail and the
//! only member can be moved to the front of the pool.

use std::{borrow::Cow, panic::Location};

use crate::{
    chunk::{ChunkFlags, ChunkId, Storage},
    error::{Error, Result},
    heap::Heap,
    pool::{span_for, PoolKey},
};

impl Heap {
    /// Change the size of a chunk, keeping the first `min(old, new)` bytes of its payload.
    ///
    /// Without a chunk a new one is allocated under `ctx`. A size of zero unlinks the chunk from
    /// `ctx`, freeing it when `ctx` was its only owner, and returns `None`.
    ///
    /// Chunks with references and pool roots can not be resized. A failed resize leaves the chunk
    /// as it was.
    #[track_caller]
    pub fn resize(
        &mut self,
        ctx: Option<ChunkId>,
        id: Option<ChunkId>,
        new_size: usize,
    ) -> Result<Option<ChunkId>> {
        let at = Location::caller();
        let Some(id) = id else {
            if new_size == 0 {
                return Ok(None);
            }
            return self
                .allocate_internal(ctx, new_size, Cow::Borrowed("resized"), false)
                .map(Some);
        };

        if new_size == 0 {
            self.unlink_at(ctx, id, at)?;
            return Ok(None);
        }
        self.check_size(new_size)?;

        let chunk = self.chunk(id);
        if !chunk.refs.is_empty() {
            return Err(Error::StillReferenced);
        }
        match chunk.storage {
            Storage::PoolRoot(_) => return Err(Error::PoolRoot),
            Storage::Pooled { pool, offset, span } => {
                self.resize_pooled(id, pool, offset, span, new_size)?
            }
            Storage::Empty | Storage::System(_) => self.resize_system(id, new_size)?,
        }
        Ok(Some(id))
    }

    /// Resize a chunk to hold `count` elements of `elem_size` bytes.
    #[track_caller]
    pub fn resize_array(
        &mut self,
        ctx: Option<ChunkId>,
        id: Option<ChunkId>,
        elem_size: usize,
        count: usize,
    ) -> Result<Option<ChunkId>> {
        let size = self.array_size(elem_size, count)?;
        self.resize(ctx, id, size)
    }

    fn resize_system(&mut self, id: ChunkId, new_size: usize) -> Result<()> {
        let threshold = self.config.shrink_threshold;
        let chunk = self.chunk_mut(id);
        let old_size = chunk.size;
        if new_size < old_size && old_size - new_size < threshold {
            chunk.size = new_size;
            return Ok(());
        }

        match chunk.storage {
            Storage::System(ref mut block) => {
                let capacity = block.capacity();
                if !block.realloc(new_size) {
                    return Err(Error::OutOfMemory { size: new_size });
                }
                if block.capacity() != capacity {
                    self.stats.system_allocs += 1;
                }
            }
            Storage::Empty => {
                let block = self.system_block(new_size)?;
                self.chunk_mut(id).storage = Storage::System(block);
            }
            Storage::Pooled { .. } | Storage::PoolRoot(_) => unreachable!(),
        }
        self.chunk_mut(id).size = new_size;
        Ok(())
    }

    fn resize_pooled(
        &mut self,
        id: ChunkId,
        key: PoolKey,
        offset: usize,
        span: usize,
        new_size: usize,
    ) -> Result<()> {
        let old_size = self.chunk(id).size;
        let new_span = span_for(new_size);

        let pool = self.pool_mut(key);
        let is_tail = offset + span == pool.cursor;

        if new_size < old_size {
            if is_tail {
                pool.cursor = offset + new_span;
                self.set_pooled(id, key, offset, new_span, new_size);
            } else {
                self.chunk_mut(id).size = new_size;
            }
            return Ok(());
        }

        let members = pool.object_count - usize::from(pool.root_live);
        if members == 1 && pool.base + new_span <= pool.block.capacity() {
            // The only member, move it to the front of the pool.
            let base = pool.base;
            pool.block
                .as_mut_slice()
                .copy_within(offset..offset + old_size, base);
            pool.cursor = base + new_span;
            self.set_pooled(id, key, base, new_span, new_size);
            return Ok(());
        }

        if new_span == span {
            self.chunk_mut(id).size = new_size;
            return Ok(());
        }

        if is_tail && pool.space_left() >= new_span - span {
            pool.cursor = offset + new_span;
            self.set_pooled(id, key, offset, new_span, new_size);
            return Ok(());
        }

        let storage = match self.pool_alloc(key, new_size, false) {
            Some(storage) => storage,
            None => Storage::System(self.system_block(new_size)?),
        };
        let storage = match storage {
            Storage::Pooled {
                offset: new_offset,
                span,
                ..
            } => {
                self.pool_mut(key)
                    .block
                    .as_mut_slice()
                    .copy_within(offset..offset + old_size, new_offset);
                Storage::Pooled {
                    pool: key,
                    offset: new_offset,
                    span,
                }
            }
            Storage::System(mut block) => {
                block.as_mut_slice()[..old_size]
                    .copy_from_slice(&self.pool(key).block.as_slice()[offset..offset + old_size]);
                Storage::System(block)
            }
            Storage::Empty | Storage::PoolRoot(_) => unreachable!(),
        };

        let chunk = self.chunk_mut(id);
        if matches!(storage, Storage::System(_)) {
            chunk.flags.remove(ChunkFlags::POOLMEM);
        }
        chunk.storage = storage;
        chunk.size = new_size;
        self.pool_free(id, key, offset, span);
        Ok(())
    }

    fn set_pooled(&mut self, id: ChunkId, pool: PoolKey, offset: usize, span: usize, size: usize) {
        let chunk = self.chunk_mut(id);
        chunk.storage = Storage::Pooled { pool, offset, span };
        chunk.size = size;
    }
}
