//! Reference handles, secondary owners keeping a chunk alive.
//!
//! A handle is a zero sized chunk parented to the owner. The target keeps a list of its handles,
//! newest last. Freeing a handle removes it from that list and never touches the target itself.

use std::{borrow::Cow, panic::Location};

use crate::{
    chunk::{ChunkFlags, ChunkId},
    error::{Error, Result},
    heap::Heap,
};

/// Name of every reference handle.
pub(crate) const REFERENCE_NAME: &str = ".reference";

impl Heap {
    /// Make `owner` an additional owner of `target`.
    /// Returns the handle representing the new edge.
    pub fn add_reference(&mut self, owner: Option<ChunkId>, target: ChunkId) -> Result<ChunkId> {
        // Validate the target before allocating anything.
        self.chunk(target);
        let handle = self.allocate_internal(owner, 0, Cow::Borrowed(REFERENCE_NAME), false)?;
        let chunk = self.chunk_mut(handle);
        chunk.flags.insert(ChunkFlags::REFERENCE);
        chunk.target = Some(target);
        self.chunk_mut(target).refs.push(handle);
        Ok(handle)
    }

    /// Remove the newest reference `owner` holds on `target`.
    #[track_caller]
    pub fn remove_reference(&mut self, owner: Option<ChunkId>, target: ChunkId) -> Result<()> {
        let owner = owner.or(self.null_context);
        let handle = self
            .reference_owned_by(owner, target)
            .ok_or(Error::NotFound)?;
        self.free_internal(handle, Location::caller())
    }

    /// Number of reference handles on a chunk.
    pub fn reference_count(&self, id: ChunkId) -> usize {
        self.chunk(id).refs.len()
    }

    /// The owners of the references on a chunk, newest first.
    pub fn reference_owners(&self, id: ChunkId) -> Vec<Option<ChunkId>> {
        self.chunk(id)
            .refs
            .iter()
            .rev()
            .map(|h| self.chunk(*h).parent)
            .collect()
    }

    /// The chunk a reference handle keeps alive.
    pub fn reference_target(&self, handle: ChunkId) -> Option<ChunkId> {
        self.chunk(handle).target
    }

    /// Find the newest handle on `target` owned by `owner`.
    pub(crate) fn reference_owned_by(
        &self,
        owner: Option<ChunkId>,
        target: ChunkId,
    ) -> Option<ChunkId> {
        self.chunk(target)
            .refs
            .iter()
            .rev()
            .copied()
            .find(|h| self.chunk(*h).parent == owner)
    }

    /// Drop one ownership edge `owner` has on a chunk.
    ///
    /// If `owner` holds a reference, that reference is removed. If `owner` is the parent, the
    /// chunk is freed when it has no references, otherwise it is handed to the owner of its
    /// newest reference.
    #[track_caller]
    pub fn unlink(&mut self, owner: Option<ChunkId>, id: ChunkId) -> Result<()> {
        self.unlink_at(owner, id, Location::caller())
    }

    pub(crate) fn unlink_at(
        &mut self,
        owner: Option<ChunkId>,
        id: ChunkId,
        at: &'static Location<'static>,
    ) -> Result<()> {
        let owner = owner.or(self.null_context);
        if let Some(handle) = self.reference_owned_by(owner, id) {
            return self.free_internal(handle, at);
        }

        let chunk = self.chunk(id);
        if chunk.parent != owner {
            return Err(Error::NotOwner);
        }
        let Some(&newest) = chunk.refs.last() else {
            return self.free_internal(id, at);
        };

        let new_parent = self.chunk(newest).parent;
        if let Some(p) = new_parent {
            if self.contains(id, p) {
                // The only way to drop the parent edge is to tear the cycle down.
                return self.free_internal(id, at);
            }
        }
        self.free_internal(newest, at)?;
        self.steal_internal(new_parent, id)
    }

    /// Remove a handle which is being freed from the reference list of its target.
    pub(crate) fn release_handle(&mut self, handle: ChunkId) {
        let Some(target) = self.chunk_mut(handle).target.take() else {
            return;
        };
        let Some(chunk) = self.chunks.get_mut(target.key) else {
            return;
        };
        if let Some(pos) = chunk.refs.iter().rposition(|h| *h == handle) {
            chunk.refs.remove(pos);
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{Error, Heap};

    #[test]
    fn add_and_remove() {
        let mut heap = Heap::new();
        let a = heap.allocate(None, 0, "a").unwrap();
        let b = heap.allocate(None, 0, "b").unwrap();
        let x = heap.allocate(Some(a), 32, "x").unwrap();

        let handle = heap.add_reference(Some(b), x).unwrap();
        assert!(heap.is_reference(handle));
        assert_eq!(heap.name(handle), ".reference");
        assert_eq!(heap.reference_target(handle), Some(x));
        assert_eq!(heap.reference_count(x), 1);
        assert_eq!(heap.reference_owners(x), vec![Some(b)]);
        assert_eq!(heap.parent_of(handle), Some(b));
        assert_eq!(heap.total_size(b), 0);
        assert_eq!(heap.total_block_count(b), 2);

        assert_eq!(heap.remove_reference(Some(a), x), Err(Error::NotFound));
        assert_eq!(heap.remove_reference(Some(b), x), Ok(()));
        assert_eq!(heap.reference_count(x), 0);
        assert!(!heap.is_live(handle));
        assert_eq!(heap.remove_reference(Some(b), x), Err(Error::NotFound));
    }

    #[test]
    fn freeing_the_handle_drops_the_reference() {
        let mut heap = Heap::new();
        let b = heap.allocate(None, 0, "b").unwrap();
        let x = heap.allocate(None, 0, "x").unwrap();
        heap.add_reference(Some(b), x).unwrap();
        heap.add_reference(Some(b), x).unwrap();
        assert_eq!(heap.reference_count(x), 2);

        heap.free(b).unwrap();
        assert_eq!(heap.reference_count(x), 0);
        assert!(heap.is_live(x));
    }

    #[test]
    fn unlink_reference_owner() {
        let mut heap = Heap::new();
        let a = heap.allocate(None, 0, "a").unwrap();
        let b = heap.allocate(None, 0, "b").unwrap();
        let x = heap.allocate(Some(a), 8, "x").unwrap();
        heap.add_reference(Some(b), x).unwrap();

        assert_eq!(heap.unlink(Some(b), x), Ok(()));
        assert_eq!(heap.reference_count(x), 0);
        assert_eq!(heap.parent_of(x), Some(a));
    }

    #[test]
    fn unlink_parent_hands_over() {
        let mut heap = Heap::new();
        let a = heap.allocate(None, 0, "a").unwrap();
        let b = heap.allocate(None, 0, "b").unwrap();
        let c = heap.allocate(None, 0, "c").unwrap();
        let x = heap.allocate(Some(a), 8, "x").unwrap();
        heap.add_reference(Some(b), x).unwrap();
        heap.add_reference(Some(c), x).unwrap();

        assert_eq!(heap.unlink(Some(a), x), Ok(()));
        assert_eq!(heap.parent_of(x), Some(c));
        assert_eq!(heap.reference_owners(x), vec![Some(b)]);

        assert_eq!(heap.unlink(Some(a), x), Err(Error::NotOwner));

        assert_eq!(heap.unlink(Some(c), x), Ok(()));
        assert_eq!(heap.parent_of(x), Some(b));
        assert_eq!(heap.reference_count(x), 0);

        assert_eq!(heap.unlink(Some(b), x), Ok(()));
        assert!(!heap.is_live(x));
    }

    #[test]
    fn unlink_top_level() {
        let mut heap = Heap::new();
        let b = heap.allocate(None, 0, "b").unwrap();
        let x = heap.allocate(None, 8, "x").unwrap();
        heap.add_reference(Some(b), x).unwrap();

        assert_eq!(heap.unlink(None, x), Ok(()));
        assert_eq!(heap.parent_of(x), Some(b));
        assert_eq!(heap.reference_count(x), 0);
    }

    #[test]
    fn self_owned_reference() {
        let mut heap = Heap::new();
        let root = heap.allocate(None, 0, "root").unwrap();
        let x = heap.allocate(Some(root), 8, "x").unwrap();
        let inner = heap.allocate(Some(x), 0, "inner").unwrap();
        heap.add_reference(Some(inner), x).unwrap();

        assert_eq!(heap.unlink(Some(root), x), Ok(()));
        assert!(!heap.is_live(x));
        assert!(!heap.is_live(inner));
        assert_eq!(heap.total_block_count(root), 1);
    }
}
