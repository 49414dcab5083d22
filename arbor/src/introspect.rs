use std::borrow::Cow;

use crate::{
    chunk::{ChunkFlags, ChunkId},
    heap::Heap,
};

impl Heap {
    /// Visit a chunk and all of its descendants.
    fn walk(&self, id: ChunkId, mut f: impl FnMut(ChunkId)) {
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            f(cur);
            stack.extend(self.children(cur));
        }
    }

    /// Payload bytes held by a chunk and its descendants. References count as zero bytes.
    pub fn total_size(&self, id: ChunkId) -> usize {
        let mut total = 0;
        self.walk(id, |x| {
            let chunk = self.chunk(x);
            if !chunk.is_reference() {
                total += chunk.size;
            }
        });
        total
    }

    /// Number of chunks in the subtree of a chunk, the chunk itself and references included.
    pub fn total_block_count(&self, id: ChunkId) -> usize {
        let mut total = 0;
        self.walk(id, |_| total += 1);
        total
    }

    pub fn size(&self, id: ChunkId) -> usize {
        self.chunk(id).size
    }

    pub fn name(&self, id: ChunkId) -> &str {
        &self.chunk(id).name
    }

    pub fn set_name(&mut self, id: ChunkId, name: impl Into<Cow<'static, str>>) {
        self.chunk_mut(id).name = name.into();
    }

    /// Returns whether the name of a chunk matches.
    pub fn check_name(&self, id: ChunkId, name: &str) -> bool {
        self.chunk(id).name == name
    }

    /// Find the closest chunk, starting at `id` itself, with the given name.
    pub fn find_parent_by_name(&self, id: ChunkId, name: &str) -> Option<ChunkId> {
        let mut cur = Some(id);
        while let Some(x) = cur {
            let chunk = self.chunk(x);
            if chunk.name == name {
                return Some(x);
            }
            cur = chunk.parent;
        }
        None
    }

    /// Returns whether the chunk is the root of a pool.
    pub fn is_pool(&self, id: ChunkId) -> bool {
        self.chunk(id).flags.contains(ChunkFlags::POOL)
    }

    pub fn is_reference(&self, id: ChunkId) -> bool {
        self.chunk(id).is_reference()
    }
}
