//! Hierarchical, reference counted memory ownership.
//!
//! Every allocation is a chunk which lives in a [`Heap`] and is owned by a parent chunk. Freeing a
//! chunk frees all of its descendants. A chunk can gain extra owners through reference handles,
//! in which case freeing its parent hands it over to one of those owners instead of destroying
//! it.
//!
//! ```rust
//! use arbor::Heap;
//!
//! let mut heap = Heap::new();
//! let root = heap.allocate(None, 0, "root").unwrap();
//! let buffer = heap.allocate_copy(Some(root), b"hello", "buffer").unwrap();
//! assert_eq!(heap.bytes(buffer), b"hello");
//!
//! heap.free(root).unwrap();
//! assert!(!heap.is_live(buffer));
//! ```
//!
//! Chunks whose children are short lived can be made into a pool, children are then bump
//! allocated out of a block reserved with the pool instead of going to the system allocator.
//!
//! Misuse of handles, like touching a freed chunk, is reported to the fatal hook of the heap
//! after which the heap panics.

mod block;
mod chunk;
mod config;
mod error;
mod free;
mod heap;
mod introspect;
mod pool;
mod reference;
mod resize;
mod tree;

pub use chunk::{ChunkId, Destructor, ALIGNMENT, MAX_DEPTH, MAX_SIZE, SHRINK_THRESHOLD};
pub use config::{Config, FatalHook, LogSink};
pub use error::{Error, Result, Veto, Violation};
pub use heap::{Heap, Stats};
pub use pool::PoolUsage;
pub use tree::Children;
