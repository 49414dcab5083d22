//! Tearing down chunks and their subtrees.
//!
//! Freeing a chunk runs its destructor, detaches it, frees its children and finally retires the
//! header and returns the payload storage. The chunk is marked with [`ChunkFlags::LOOP`] while
//! its children are freed so references pointing back up the tree do not free it twice.
//!
//! A child which can not be freed is not lost, it is moved to the owner of its newest reference,
//! else to the parent of the chunk being freed, else to the null context.

use std::{mem, panic::Location};

use crate::{
    chunk::{ChunkFlags, ChunkId, DestructorSlot, Storage, Tombstone},
    error::{Error, Result},
    heap::Heap,
};

impl Heap {
    /// Free a chunk and everything it owns.
    ///
    /// A chunk with references can only be freed if it is top level and has a single reference,
    /// in which case it is handed to the owner of that reference instead. If the destructor of
    /// the chunk vetoes, nothing is changed.
    #[track_caller]
    pub fn free(&mut self, id: ChunkId) -> Result<()> {
        self.free_at(id, Location::caller())
    }

    pub(crate) fn free_at(&mut self, id: ChunkId, at: &'static Location<'static>) -> Result<()> {
        let chunk = self.chunk(id);
        let Some(&newest) = chunk.refs.last() else {
            return self.free_internal(id, at);
        };

        if chunk.refs.len() == 1 {
            if chunk.parent == self.null_context {
                return self.unlink_at(None, id, at);
            }
            if self.contains(id, newest) {
                return self.free_internal(id, at);
            }
        }

        self.log(format_args!(
            "free of `{}` with references at {at}",
            chunk.name
        ));
        for owner in self.reference_owners(id) {
            match owner {
                Some(owner) => self.log(format_args!(
                    "\treference held by {owner:?} (`{}`)",
                    self.chunk(owner).name
                )),
                None => self.log(format_args!("\treference held by the top level")),
            }
        }
        Err(Error::StillReferenced)
    }

    pub(crate) fn free_internal(
        &mut self,
        id: ChunkId,
        at: &'static Location<'static>,
    ) -> Result<()> {
        self.free_chunk(id, at, false)
    }

    /// `consulted` is set once the destructor of the chunk has run and agreed.
    fn free_chunk(
        &mut self,
        id: ChunkId,
        at: &'static Location<'static>,
        consulted: bool,
    ) -> Result<()> {
        let chunk = self.chunk(id);
        let looping = chunk.flags.contains(ChunkFlags::LOOP);
        let held_inside = !chunk.refs.is_empty()
            && chunk.refs.iter().all(|&handle| self.contains(id, handle));
        if held_inside && !consulted && !looping {
            // The chunk will go, but its references must survive a veto.
            self.run_destructor(id)?;
            return self.free_chunk(id, at, true);
        }

        if let Some(&handle) = self.chunk(id).refs.last() {
            // A reference held from within the subtree of the chunk is torn down with it.
            let is_child = self.contains(id, handle);
            self.free_internal(handle, at)?;
            if is_child {
                return self.free_chunk(id, at, consulted);
            }
            return Err(Error::StillReferenced);
        }

        if looping {
            return Ok(());
        }
        if !consulted {
            self.run_destructor(id)?;
        }

        if self.chunk(id).is_reference() {
            self.release_handle(id);
        }
        if self.null_context == Some(id) {
            self.null_context = None;
        }

        let parent = self.chunk(id).parent;
        self.detach(id);
        self.chunk_mut(id).flags.insert(ChunkFlags::LOOP);
        self.free_children_of(id, parent, at);

        let name = mem::take(&mut self.chunk_mut(id).name);
        let Some(chunk) = self.chunks.remove(id.key, Tombstone { name, freed_at: at }) else {
            unreachable!()
        };
        // References taken out while the children were freed are left without a target.
        for handle in chunk.refs {
            if let Some(handle) = self.chunks.get_mut(handle.key) {
                handle.target = None;
            }
        }
        self.reclaim(id, chunk.storage);
        Ok(())
    }

    /// Run the destructor of a chunk, if it has one. On a veto the destructor is put back.
    fn run_destructor(&mut self, id: ChunkId) -> Result<()> {
        let chunk = self.chunk_mut(id);
        match mem::replace(&mut chunk.destructor, DestructorSlot::Running) {
            DestructorSlot::Running => return Err(Error::DestructorRunning),
            DestructorSlot::Empty => chunk.destructor = DestructorSlot::Empty,
            DestructorSlot::Set(mut destructor) => {
                let res = destructor(self, id);
                let chunk = self.chunk_mut(id);
                let running = matches!(chunk.destructor, DestructorSlot::Running);
                if res.is_err() {
                    if running {
                        chunk.destructor = DestructorSlot::Set(destructor);
                    }
                    return Err(Error::DestructorVetoed);
                }
                if running {
                    chunk.destructor = DestructorSlot::Empty;
                }
            }
        }
        Ok(())
    }

    /// Free all children of a chunk, leaving the chunk itself alive.
    ///
    /// Children which refuse to be freed are moved like the orphans of a freed chunk. If there
    /// is nowhere to move them they stay where they are.
    #[track_caller]
    pub fn free_children(&mut self, id: ChunkId) {
        let parent = self.chunk(id).parent;
        self.free_children_of(id, parent, Location::caller());
    }

    fn free_children_of(
        &mut self,
        id: ChunkId,
        fallback: Option<ChunkId>,
        at: &'static Location<'static>,
    ) {
        let mut kept = Vec::new();
        while self.is_live(id) {
            let Some(child) = self.children(id).find(|c| !kept.contains(c)) else {
                break;
            };
            let newest = self.chunk(child).refs.last().copied();
            let owner = newest.and_then(|h| self.chunk(h).parent);

            let res = self.free_internal(child, at);
            if !self.is_live(child) || self.chunk(child).parent != Some(id) {
                continue;
            }
            if res.is_ok() {
                // Torn down further up the current free.
                self.detach(child);
                continue;
            }
            if owner == Some(id) && newest.map_or(false, |h| !self.is_live(h)) {
                // One reference less, try again.
                continue;
            }

            let new_parent = [owner, fallback, self.null_context]
                .into_iter()
                .flatten()
                .find(|&p| p != id && self.is_live(p) && !self.contains(child, p));
            match new_parent {
                Some(new_parent) => {
                    self.detach(child);
                    self.attach(Some(new_parent), child);
                }
                None if self.chunk(id).flags.contains(ChunkFlags::LOOP) => self.detach(child),
                None => kept.push(child),
            }
        }
    }

    /// Return the payload storage of a retired chunk.
    fn reclaim(&mut self, id: ChunkId, storage: Storage) {
        match storage {
            Storage::Empty => {}
            Storage::System(block) => self.release_block(block),
            Storage::Pooled { pool, offset, span } => self.pool_free(id, pool, offset, span),
            Storage::PoolRoot(pool) => self.pool_release_root(id, pool),
        }
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use crate::{Config, Error, Heap, Veto};

    #[test]
    fn frees_subtree() {
        let mut heap = Heap::new();
        let root = heap.allocate(None, 0, "root").unwrap();
        let a = heap.allocate(Some(root), 10, "a").unwrap();
        let b = heap.allocate(Some(a), 10, "b").unwrap();
        let c = heap.allocate(Some(b), 10, "c").unwrap();

        heap.free(a).unwrap();
        assert!(!heap.is_live(a));
        assert!(!heap.is_live(b));
        assert!(!heap.is_live(c));
        assert_eq!(heap.stats().live_chunks, 1);
        assert_eq!(heap.stats().system_frees, 3);
    }

    #[test]
    fn destructors_run_parent_first() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut heap = Heap::new();
        let a = heap.allocate(None, 0, "a").unwrap();
        let b = heap.allocate(Some(a), 0, "b").unwrap();
        let c = heap.allocate(Some(a), 0, "c").unwrap();
        for id in [a, b, c] {
            let order = order.clone();
            heap.set_destructor(id, move |heap, id| {
                order.borrow_mut().push(heap.name(id).to_string());
                Ok(())
            });
        }

        heap.free(a).unwrap();
        assert_eq!(*order.borrow(), vec!["a", "c", "b"]);
    }

    #[test]
    fn veto_keeps_subtree() {
        let mut heap = Heap::new();
        let a = heap.allocate(None, 0, "a").unwrap();
        let b = heap.allocate(Some(a), 8, "b").unwrap();
        heap.set_destructor(a, |_, _| Err(Veto));

        assert_eq!(heap.free(a), Err(Error::DestructorVetoed));
        assert!(heap.is_live(a));
        assert!(heap.is_live(b));
        assert!(heap.has_destructor(a));
        assert_eq!(heap.total_block_count(a), 2);
    }

    #[test]
    fn vetoing_child_is_reparented() {
        let mut heap = Heap::new();
        let root = heap.allocate(None, 0, "root").unwrap();
        let a = heap.allocate(Some(root), 0, "a").unwrap();
        let b = heap.allocate(Some(a), 8, "b").unwrap();
        heap.set_destructor(b, |_, _| Err(Veto));

        heap.free(a).unwrap();
        assert!(!heap.is_live(a));
        assert_eq!(heap.parent_of(b), Some(root));
    }

    #[test]
    fn vetoing_child_goes_to_null_context() {
        let mut heap = Heap::with_config(Config::default().null_tracking(true));
        let top = heap.allocate(None, 0, "top").unwrap();
        heap.disable_null_tracking();
        heap.enable_null_tracking();
        assert_eq!(heap.parent_of(top), None);
        let b = heap.allocate(Some(top), 8, "b").unwrap();
        heap.set_destructor(b, |_, _| Err(Veto));

        heap.free(top).unwrap();
        assert_eq!(heap.parent_of(b), heap.null_context());
    }

    #[test]
    fn destructor_freeing_itself() {
        let seen = Rc::new(RefCell::new(None));
        let mut heap = Heap::new();
        let a = heap.allocate(None, 0, "a").unwrap();
        let inner = seen.clone();
        heap.set_destructor(a, move |heap, id| {
            *inner.borrow_mut() = Some(heap.free(id));
            Ok(())
        });

        assert_eq!(heap.free(a), Ok(()));
        assert_eq!(*seen.borrow(), Some(Err(Error::DestructorRunning)));
        assert!(!heap.is_live(a));
    }

    #[test]
    fn destructor_replacing_itself_on_veto() {
        let mut heap = Heap::new();
        let a = heap.allocate(None, 0, "a").unwrap();
        heap.set_destructor(a, |heap, id| {
            heap.clear_destructor(id);
            Err(Veto)
        });

        assert_eq!(heap.free(a), Err(Error::DestructorVetoed));
        assert!(!heap.has_destructor(a));
        assert_eq!(heap.free(a), Ok(()));
    }

    #[test]
    fn still_referenced() {
        let logged = Rc::new(RefCell::new(Vec::<String>::new()));
        let sink = logged.clone();
        let mut heap = Heap::with_config(
            Config::default().log_sink(move |msg| sink.borrow_mut().push(msg.to_string())),
        );
        let a = heap.allocate(None, 0, "a").unwrap();
        let b = heap.allocate(None, 0, "b").unwrap();
        let x = heap.allocate(Some(a), 0, "x").unwrap();
        heap.add_reference(Some(b), x).unwrap();

        assert_eq!(heap.free(x), Err(Error::StillReferenced));
        assert!(heap.is_live(x));
        assert_eq!(heap.reference_count(x), 1);
        let logged = logged.borrow();
        assert_eq!(logged.len(), 2);
        assert!(logged[0].contains("`x`"));
        assert!(logged[1].contains("`b`"));
    }

    #[test]
    fn top_level_single_reference_is_handed_over() {
        let mut heap = Heap::new();
        let b = heap.allocate(None, 0, "b").unwrap();
        let x = heap.allocate(None, 0, "x").unwrap();
        heap.add_reference(Some(b), x).unwrap();

        assert_eq!(heap.free(x), Ok(()));
        assert!(heap.is_live(x));
        assert_eq!(heap.parent_of(x), Some(b));
        assert_eq!(heap.reference_count(x), 0);
    }

    #[test]
    fn reference_cycle() {
        let mut heap = Heap::new();
        let a = heap.allocate(None, 0, "a").unwrap();
        let b = heap.allocate(Some(a), 0, "b").unwrap();
        // a is kept alive from inside its own subtree.
        heap.add_reference(Some(b), a).unwrap();

        assert_eq!(heap.free(a), Ok(()));
        assert!(!heap.is_live(a));
        assert!(!heap.is_live(b));
        assert_eq!(heap.stats().live_chunks, 0);
    }

    #[test]
    fn veto_keeps_reference_from_subtree() {
        let mut heap = Heap::new();
        let a = heap.allocate(None, 0, "a").unwrap();
        let b = heap.allocate(Some(a), 0, "b").unwrap();
        heap.add_reference(Some(b), a).unwrap();
        heap.set_destructor(a, |_, _| Err(Veto));
        let stats = heap.stats();

        assert_eq!(heap.free(a), Err(Error::DestructorVetoed));
        assert_eq!(heap.reference_count(a), 1);
        assert_eq!(heap.reference_owners(a), vec![Some(b)]);
        assert_eq!(heap.total_block_count(a), 3);
        assert_eq!(heap.stats(), stats);

        heap.clear_destructor(a);
        assert_eq!(heap.free(a), Ok(()));
        assert_eq!(heap.stats().live_chunks, 0);
    }

    #[test]
    fn orphan_referenced_from_below_goes_to_parent() {
        let mut heap = Heap::new();
        let root = heap.allocate(None, 0, "root").unwrap();
        let a = heap.allocate(Some(root), 0, "a").unwrap();
        let c = heap.allocate(Some(a), 8, "c").unwrap();
        let d = heap.allocate(Some(c), 0, "d").unwrap();
        let e = heap.allocate(None, 0, "e").unwrap();
        heap.add_reference(Some(e), c).unwrap();
        heap.add_reference(Some(d), c).unwrap();

        heap.free(a).unwrap();
        assert!(!heap.is_live(a));
        assert!(heap.is_live(c));
        assert_eq!(heap.parent_of(c), Some(root));
        assert_eq!(heap.parent_of(d), Some(c));
        assert_eq!(heap.reference_count(c), 0);
        assert_eq!(heap.total_size(root), 8);
    }

    #[test]
    fn children_referencing_each_other() {
        let mut heap = Heap::new();
        let root = heap.allocate(None, 0, "root").unwrap();
        let x = heap.allocate(Some(root), 0, "x").unwrap();
        let y = heap.allocate(Some(root), 0, "y").unwrap();
        heap.add_reference(Some(x), y).unwrap();
        heap.add_reference(Some(y), x).unwrap();

        heap.free(root).unwrap();
        assert_eq!(heap.stats().live_chunks, 0);
    }

    #[test]
    fn free_children_keeps_parent() {
        let mut heap = Heap::new();
        let a = heap.allocate(None, 0, "a").unwrap();
        heap.allocate(Some(a), 8, "b").unwrap();
        heap.allocate(Some(a), 8, "c").unwrap();

        heap.free_children(a);
        assert!(heap.is_live(a));
        assert_eq!(heap.first_child(a), None);
        assert_eq!(heap.total_block_count(a), 1);
    }

    #[test]
    fn free_children_of_null_context_keeps_vetoing_child() {
        let runs = Rc::new(RefCell::new(0));
        let mut heap = Heap::with_config(Config::default().null_tracking(true));
        let null = heap.null_context().unwrap();
        let stubborn = heap.allocate(None, 8, "stubborn").unwrap();
        let counter = runs.clone();
        heap.set_destructor(stubborn, move |_, _| {
            *counter.borrow_mut() += 1;
            Err(Veto)
        });
        let plain = heap.allocate(None, 8, "plain").unwrap();
        heap.allocate(None, 8, "newest").unwrap();

        heap.free_children(null);
        assert_eq!(*runs.borrow(), 1);
        assert!(!heap.is_live(plain));
        assert_eq!(heap.children(null).collect::<Vec<_>>(), vec![stubborn]);
        assert!(heap.has_destructor(stubborn));
    }
}
