//! A copy-on-write indexed storage primitive: a persistent `u64 -> Entry`
//! map implemented as a 256-ary radix trie whose leaves are compact
//! open-addressed hash buckets with a condenser index.
//!
//! This is the indexing layer of an embedded database storage engine.
//! File I/O, mmap, page management, and the row/table payload types that
//! actually inhabit the map are external collaborators, out of scope here
//! (see `SPEC_FULL.md`). [`memory::ArenaMemory`] stands in for the real
//! substrate, giving the algorithms below something concrete to run and be
//! tested against.

pub mod direct_map;
pub mod entry;
pub mod error;
pub mod leaf;
pub mod memory;
pub mod trie;

pub use direct_map::{DirectMap, DirectMapOptions, KeySource};
pub use entry::Entry;
pub use error::{MapError, MemoryError};
pub use memory::{ArenaMemory, Memory, Ref, RefAny};
