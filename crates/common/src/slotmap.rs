use std::{fmt, hash::Hash, mem};

#[macro_export]
macro_rules! newtype_key{
    ( $(#[$attrs:meta])* $v:vis struct $name:ident($ty:ident);) => {
        $(#[$attrs])*
        #[derive(Copy, Clone, Default, Debug, Eq,PartialEq, Hash)]
        $v struct $name ($ty);

        unsafe impl $crate::slotmap::SlotKey for $name{
            type Version = <$ty as $crate::slotmap::SlotKey>::Version;
            const MAX: usize = <$ty as $crate::slotmap::SlotKey>::MAX;

            fn new(v: usize) -> Self{
                $name(<$ty as $crate::slotmap::SlotKey>::new(v))
            }

            #[inline(always)]
            fn new_version(idx: usize, version: Self::Version) -> Self {
                $name(<$ty as $crate::slotmap::SlotKey>::new_version(idx,version))
            }

            fn index(&self) -> usize{
                $crate::slotmap::SlotKey::index(&self.0)
            }

            #[inline(always)]
            fn version(&self) -> Self::Version {
                $crate::slotmap::SlotKey::version(&self.0)
            }

            #[inline(always)]
            fn next_version(self) -> Self {
                $name($crate::slotmap::SlotKey::next_version(self.0))
            }
        }
    }
}

/// Unsafe because the implementation must guarentee
/// that the key returns the value recieved when created.
///
/// Implementation will guarentee that a key will not be created
/// with a value larger then indicated by `MAX`
pub unsafe trait SlotKey:
    Copy + Clone + Default + PartialEq + Eq + Hash + fmt::Debug
{
    type Version: Default + Eq + PartialEq + Clone + Copy + fmt::Debug;
    const MAX: usize;

    fn new(v: usize) -> Self;

    #[inline(always)]
    fn new_version(idx: usize, _version: Self::Version) -> Self {
        Self::new(idx)
    }

    fn index(&self) -> usize;

    #[inline(always)]
    fn version(&self) -> Self::Version {
        Default::default()
    }

    #[inline(always)]
    fn next_version(self) -> Self {
        self
    }
}

/// A key carrying a version, so that a key to a removed value can be told apart from a key to
/// the value which later took its slot.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug)]
pub struct VersionKey {
    idx: u32,
    version: u32,
}

unsafe impl SlotKey for VersionKey {
    type Version = u32;
    const MAX: usize = u32::MAX as usize;

    #[inline(always)]
    fn new(idx: usize) -> Self {
        VersionKey {
            idx: idx as u32,
            version: 0,
        }
    }

    fn new_version(idx: usize, version: Self::Version) -> Self {
        VersionKey {
            idx: idx as u32,
            version,
        }
    }

    #[inline(always)]
    fn index(&self) -> usize {
        self.idx as usize
    }

    #[inline(always)]
    fn version(&self) -> u32 {
        self.version
    }

    fn next_version(mut self) -> Self {
        self.version = self.version.wrapping_add(1);
        self
    }
}

#[derive(Debug)]
enum Slot<T, D, V> {
    Occupied {
        value: T,
        version: V,
    },
    Vacant {
        version: V,
        next: Option<usize>,
        /// What is left of the last value which lived in this slot.
        tomb: Option<D>,
    },
}

/// The result of looking up a key which might be stale.
#[derive(Debug)]
pub enum Lookup<'a, T, D> {
    /// The key points to a live value.
    Occupied(&'a T),
    /// The value was removed and its tombstone is still present.
    Retired(&'a D),
    /// The value was removed and the slot was reused or wiped since.
    Stale,
    /// The key was never handed out by this map.
    Missing,
}

/// A vector of slots with stable, versioned keys.
///
/// Removing a value leaves a tombstone of type `D` in the slot. Vacant slots are reused in the
/// order they were vacated so tombstones survive as long as possible.
#[derive(Debug)]
pub struct SlotVec<T, Idx: SlotKey = VersionKey, D = ()> {
    values: Vec<Slot<T, D, Idx::Version>>,
    free_head: Option<usize>,
    free_tail: Option<usize>,
    len: usize,
}

impl<T, Idx: SlotKey, D> Default for SlotVec<T, Idx, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, Idx: SlotKey, D> SlotVec<T, Idx, D> {
    /// Create a new list.
    pub fn new() -> Self {
        SlotVec {
            values: Vec::new(),
            free_head: None,
            free_tail: None,
            len: 0,
        }
    }

    pub fn get(&self, idx: Idx) -> Option<&T> {
        match self.values.get(idx.index())? {
            Slot::Occupied { value, version } if *version == idx.version() => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, idx: Idx) -> Option<&mut T> {
        match self.values.get_mut(idx.index())? {
            Slot::Occupied { value, version } if *version == idx.version() => Some(value),
            _ => None,
        }
    }

    /// Look up a key, reporting why a key does not point to a live value.
    pub fn lookup(&self, idx: Idx) -> Lookup<'_, T, D> {
        match self.values.get(idx.index()) {
            None => Lookup::Missing,
            Some(Slot::Occupied { value, version }) => {
                if *version == idx.version() {
                    Lookup::Occupied(value)
                } else {
                    Lookup::Stale
                }
            }
            Some(Slot::Vacant {
                version,
                tomb: Some(tomb),
                ..
            }) if *version == idx.version() => Lookup::Retired(tomb),
            Some(Slot::Vacant { .. }) => Lookup::Stale,
        }
    }

    /// Insert a value into the list.
    /// Returns the index at which the value was inserted.
    pub fn insert(&mut self, v: T) -> Idx {
        if let Some(x) = self.free_head {
            let (version, next) = match self.values[x] {
                Slot::Vacant { version, next, .. } => (version, next),
                Slot::Occupied { .. } => panic!("invalid free list!"),
            };
            self.free_head = next;
            if next.is_none() {
                self.free_tail = None;
            }
            let idx = Idx::new_version(x, version).next_version();
            self.values[x] = Slot::Occupied {
                value: v,
                version: idx.version(),
            };
            self.len += 1;
            idx
        } else {
            if self.values.len() >= <Idx as SlotKey>::MAX {
                panic!("to many values for the given index")
            }
            let idx = Idx::new(self.values.len());
            self.values.push(Slot::Occupied {
                value: v,
                version: idx.version(),
            });
            self.len += 1;
            idx
        }
    }

    /// Remove a value at the given index, leaving `tomb` in its place.
    /// Returns `Some` if there is a value at the given index else returns none.
    pub fn remove(&mut self, idx: Idx, tomb: D) -> Option<T> {
        let i = idx.index();
        match self.values.get(i) {
            Some(Slot::Occupied { version, .. }) if *version == idx.version() => {}
            _ => return None,
        }
        let vacant = Slot::Vacant {
            version: idx.version(),
            next: None,
            tomb: Some(tomb),
        };
        let Slot::Occupied { value, .. } = mem::replace(&mut self.values[i], vacant) else {
            unreachable!()
        };

        if let Some(tail) = self.free_tail {
            if let Slot::Vacant { ref mut next, .. } = self.values[tail] {
                *next = Some(i);
            }
        } else {
            self.free_head = Some(i);
        }
        self.free_tail = Some(i);
        self.len -= 1;
        Some(value)
    }

    /// Returns the amount of present values.
    pub fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod test {
    use super::{Lookup, SlotKey, SlotVec, VersionKey};

    #[test]
    fn insert_and_remove() {
        let mut map = SlotVec::<&str, VersionKey, &str>::new();
        let a = map.insert("a");
        let b = map.insert("b");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(a), Some(&"a"));

        assert_eq!(map.remove(a, "freed a"), Some("a"));
        assert_eq!(map.remove(a, "again"), None);
        assert!(map.get(a).is_none());
        assert_eq!(map.get(b), Some(&"b"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn tombstone_until_reuse() {
        let mut map = SlotVec::<u32, VersionKey, &str>::new();
        let a = map.insert(1);
        map.remove(a, "here");
        assert!(matches!(map.lookup(a), Lookup::Retired(&"here")));

        let b = map.insert(2);
        assert_eq!(a.index(), b.index());
        assert_ne!(a.version(), b.version());
        assert!(matches!(map.lookup(a), Lookup::Stale));
        assert!(matches!(map.lookup(b), Lookup::Occupied(&2)));
        assert!(matches!(
            map.lookup(VersionKey::new(10)),
            Lookup::Missing
        ));
    }

    #[test]
    fn slots_are_reused_in_order() {
        let mut map = SlotVec::<u32, VersionKey, ()>::new();
        let keys: Vec<_> = (0..4).map(|x| map.insert(x)).collect();
        map.remove(keys[2], ());
        map.remove(keys[0], ());
        map.remove(keys[3], ());

        assert_eq!(map.insert(10).index(), keys[2].index());
        assert_eq!(map.insert(11).index(), keys[0].index());
        assert_eq!(map.insert(12).index(), keys[3].index());
        assert_eq!(map.insert(13).index(), 4);

        assert_eq!(map.get(keys[1]), Some(&1));
        assert_eq!(map.len(), 5);
    }
}
