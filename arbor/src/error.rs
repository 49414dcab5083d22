use std::{borrow::Cow, panic::Location};

use thiserror::Error;

use crate::chunk::ChunkId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Recoverable failures. An operation returning one of these left the tree exactly as it was.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("out of memory allocating {size} bytes")]
    OutOfMemory { size: usize },
    #[error("requested size of {requested} bytes exceeds the maximum of {max} bytes")]
    OverCap { requested: usize, max: usize },
    #[error("chunk is still referenced")]
    StillReferenced,
    #[error("destructor vetoed the free")]
    DestructorVetoed,
    #[error("the destructor of the chunk is currently running")]
    DestructorRunning,
    #[error("no reference held by the given owner")]
    NotFound,
    #[error("context is neither the parent nor a reference owner of the chunk")]
    NotOwner,
    #[error("the root of a pool can not be resized")]
    PoolRoot,
    #[error("a chunk can not become its own descendant")]
    Cycle,
}

/// Returned by a destructor to keep its chunk alive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Veto;

/// Corruption of the tree. These are never returned, they are reported to the fatal hook after
/// which the heap panics.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("bad chunk magic: {id:?} was not allocated by this heap")]
    BadMagic { id: ChunkId },
    #[error("access after free of {id:?}{}", describe_free(.name, .freed_at))]
    AccessAfterFree {
        id: ChunkId,
        name: Option<Cow<'static, str>>,
        freed_at: Option<&'static Location<'static>>,
    },
    #[error("pool object count underflow in pool carrying {id:?}")]
    PoolUnderflow { id: ChunkId },
}

fn describe_free(
    name: &Option<Cow<'static, str>>,
    freed_at: &Option<&'static Location<'static>>,
) -> String {
    match (name, freed_at) {
        (Some(name), Some(at)) => format!(" (`{name}`, first free may be at {at})"),
        (None, Some(at)) => format!(" (first free may be at {at})"),
        (Some(name), None) => format!(" (`{name}`)"),
        (None, None) => String::new(),
    }
}
