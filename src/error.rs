use thiserror::Error;

/// Failures from the [`Memory`](crate::memory::Memory) substrate.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MemoryError {
    /// The scratch arena could not satisfy an allocation.
    #[error("scratch arena exhausted, requested 0x{requested:x} bytes")]
    OutOfMemory { requested: usize },
    /// The file arena could not satisfy an allocation.
    #[error("file arena exhausted, requested 0x{requested:x} bytes")]
    OutOfFileSpace { requested: usize },
    /// A leaf's condenser, a one-based byte index, cannot address a 256th
    /// entry. Not a substrate failure, but surfaced alongside one: from the
    /// caller's side both mean "this candidate bucket has no room".
    #[error("leaf at capacity: condenser cannot represent a 256th entry")]
    LeafFull,
}

/// Failures surfaced by the trie, leaf, and direct-map operations.
///
/// Three kinds only, per the error handling design: `NotFound` is
/// recoverable and returned directly, `OutOfSpace` propagates and aborts
/// the current write transaction, `CorruptState` is fatal.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MapError {
    /// The key is absent, or the leaf slot that would contain it is null.
    #[error("key not found")]
    NotFound,
    /// No room for the requested write: either substrate allocation was
    /// refused, or a leaf hit its documented 255-entry capacity. Either way
    /// the in-flight transaction must be discarded; for `insert`, the caller
    /// should draw a fresh key rather than treat this as unsound.
    #[error("allocation failed")]
    OutOfSpace(#[from] MemoryError),
    /// An invariant was violated during traversal. The map must be treated
    /// as unsound past this point.
    #[error("corrupt state: {0}")]
    CorruptState(&'static str),
}
