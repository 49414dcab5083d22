//! Parent, child and sibling links between chunks.
//!
//! Children form a doubly linked list with the newest child at the head. Every chunk stores its
//! own parent so resolving a parent never walks the sibling list.

use common::{sassert, tassert_eq};

use crate::{
    chunk::{ChunkId, MAX_DEPTH},
    error::{Error, Result},
    heap::Heap,
};

/// Iterator over the children of a chunk, newest first.
pub struct Children<'a> {
    heap: &'a Heap,
    next: Option<ChunkId>,
}

impl Iterator for Children<'_> {
    type Item = ChunkId;

    fn next(&mut self) -> Option<ChunkId> {
        let cur = self.next?;
        self.next = self.heap.chunk(cur).next;
        Some(cur)
    }
}

impl Heap {
    /// Insert a detached chunk as the newest child of `parent`.
    /// With no parent the chunk becomes top level.
    pub(crate) fn attach(&mut self, parent: Option<ChunkId>, id: ChunkId) {
        let head = match parent {
            Some(parent) => self.chunk_mut(parent).child.replace(id),
            None => None,
        };
        if let Some(head) = head {
            self.chunk_mut(head).prev = Some(id);
        }
        let chunk = self.chunk_mut(id);
        chunk.parent = parent;
        chunk.prev = None;
        chunk.next = head;
    }

    /// Remove a chunk from the child list of its parent, leaving it top level.
    pub(crate) fn detach(&mut self, id: ChunkId) {
        sassert!(self
            .chunk(id)
            .parent
            .map_or(true, |p| self.children(p).any(|c| c == id)));
        let chunk = self.chunk_mut(id);
        let parent = chunk.parent.take();
        let prev = chunk.prev.take();
        let next = chunk.next.take();

        if let Some(next) = next {
            self.chunk_mut(next).prev = prev;
        }
        match prev {
            Some(prev) => self.chunk_mut(prev).next = next,
            None => {
                if let Some(parent) = parent {
                    let parent = self.chunk_mut(parent);
                    tassert_eq!(parent.child, Some(id));
                    parent.child = next;
                }
            }
        }
    }

    pub fn parent_of(&self, id: ChunkId) -> Option<ChunkId> {
        self.chunk(id).parent
    }

    /// The newest child of a chunk.
    pub fn first_child(&self, id: ChunkId) -> Option<ChunkId> {
        self.chunk(id).child
    }

    pub fn children(&self, id: ChunkId) -> Children<'_> {
        Children {
            heap: self,
            next: self.chunk(id).child,
        }
    }

    /// Returns whether `candidate` is a strict ancestor of `id`.
    ///
    /// Gives up and returns `false` after walking [`MAX_DEPTH`] parents.
    pub fn is_ancestor(&self, candidate: ChunkId, id: ChunkId) -> bool {
        let mut cur = self.chunk(id).parent;
        let mut depth = 0;
        while let Some(x) = cur {
            if x == candidate {
                return true;
            }
            depth += 1;
            if depth >= MAX_DEPTH {
                self.log(format_args!(
                    "ancestry of {id:?} is deeper than {MAX_DEPTH} chunks"
                ));
                return false;
            }
            cur = self.chunk(x).parent;
        }
        false
    }

    /// Returns whether `id` is `root` or one of its descendants.
    pub(crate) fn contains(&self, root: ChunkId, id: ChunkId) -> bool {
        root == id || self.is_ancestor(root, id)
    }

    /// Move a chunk, with its whole subtree, to a new parent.
    ///
    /// A `None` parent means the null context if null tracking is enabled, otherwise top level.
    pub fn steal(&mut self, new_parent: Option<ChunkId>, id: ChunkId) -> Result<ChunkId> {
        let chunk = self.chunk(id);
        if !chunk.refs.is_empty() {
            self.log(format_args!(
                "steal of `{}` which still has {} reference(s)",
                chunk.name,
                chunk.refs.len()
            ));
        }
        self.steal_internal(new_parent, id)?;
        Ok(id)
    }

    pub(crate) fn steal_internal(&mut self, new_parent: Option<ChunkId>, id: ChunkId) -> Result<()> {
        let new_parent = new_parent.or(self.null_context);
        if let Some(p) = new_parent {
            if self.contains(id, p) {
                return Err(Error::Cycle);
            }
        }
        if self.chunk(id).parent == new_parent {
            return Ok(());
        }
        self.detach(id);
        self.attach(new_parent, id);
        Ok(())
    }

    /// Move a chunk owned by `old_parent` to `new_parent`.
    ///
    /// If `old_parent` is not the parent but holds a reference to the chunk, the reference is
    /// moved instead.
    pub fn reparent(
        &mut self,
        old_parent: Option<ChunkId>,
        new_parent: Option<ChunkId>,
        id: ChunkId,
    ) -> Result<ChunkId> {
        let old_parent = old_parent.or(self.null_context);
        if self.chunk(id).parent == old_parent {
            self.steal_internal(new_parent, id)?;
            return Ok(id);
        }
        match self.reference_owned_by(old_parent, id) {
            Some(handle) => {
                self.steal_internal(new_parent, handle)?;
                Ok(id)
            }
            None => Err(Error::NotFound),
        }
    }
}
