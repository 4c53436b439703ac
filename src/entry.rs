//! The payload type hosted at each key, and the two hooks it must provide.

use bytemuck::{Pod, Zeroable};

use crate::memory::Memory;

/// An opaque, fixed-size payload stored at each key.
///
/// Entries must be trivially bit-copyable aside from the two hooks below,
/// which let a payload react to its containing leaf record moving between
/// scratch and file regions — e.g. to bump a back-reference count on a
/// table the payload points to. Both hooks may themselves allocate through
/// `mem`.
///
/// The row/table types that actually inhabit a production map are an
/// external collaborator and out of scope here; callers supply their own
/// `Entry` implementation.
pub trait Entry: Pod + Zeroable {
    /// Called once, after this payload's containing leaf has just been
    /// copied from a file region into scratch (see `leaf::grow`).
    fn on_copied_from_file(&mut self, mem: &mut dyn Memory);

    /// Called once, after this payload's containing leaf has just been
    /// copied from scratch into a file region (see `leaf::commit`).
    fn on_copied_to_file(&mut self, mem: &mut dyn Memory);
}
