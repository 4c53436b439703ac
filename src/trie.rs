//! Radix Trie: a fixed-depth 256-ary tree keyed by the low bits of a 64-bit
//! index.
//!
//! Interior nodes are 256-slot arrays of child handles. The bottom slot of
//! every non-null path holds a leaf (owned and interpreted by
//! `crate::leaf`, not by this module — the trie only ever moves `RefAny`
//! around). Shift/level arithmetic here is grounded directly on
//! `original_source/architecture-lab/tree.cpp`'s `_TreeTop::init`,
//! `lookup`, `cow_path`, `_TreeNode::commit` and `free_tree_internal`.

use bytemuck::{Pod, Zeroable};

use crate::error::MapError;
use crate::memory::{alloc_file, alloc_scratch, translate, write_back, Memory, Ref, RefAny};

/// A fixed array of 256 child handles: one level of the trie.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct InteriorNode {
    pub children: [RefAny; 256],
}

impl InteriorNode {
    pub fn empty() -> Self {
        Self::zeroed()
    }
}

/// Type-erased, single-operation capability the trie invokes on the leaf at
/// the bottom of a commit traversal, so interior-node code never needs to
/// know the payload type `TEntry`.
pub trait LeafCommitter {
    fn commit(&mut self, mem: &mut dyn Memory, leaf: RefAny) -> Result<RefAny, MapError>;
}

/// Type-erased, single-operation capability used to free every reachable
/// leaf before the trie's own interior scaffolding is freed.
pub trait LeafFreer {
    fn free(&mut self, mem: &mut dyn Memory, leaf: RefAny);
}

/// The root descriptor of a radix trie.
///
/// Lives in the writer-owned `DirectMap`, not behind a `Memory` handle —
/// per spec.md §4.2, the top-level handle itself is never copy-on-written
/// by `cow_path`; it's always considered mutable because its owner (the
/// direct map) is the sole writer.
pub struct TrieTop {
    pub mask: u64,
    pub count: u64,
    pub levels: u8,
    pub top_level: RefAny,
}

impl TrieTop {
    /// Choose the smallest `bits >= 4` with `2^bits >= capacity`, derive
    /// `levels` from it, and start with an empty (null) tree.
    pub fn init(capacity: u64) -> Self {
        let mut bits: u32 = 4;
        while (1u64.checked_shl(bits).unwrap_or(0)) < capacity && bits < 64 {
            bits += 1;
        }
        let mask = if bits >= 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        };
        let levels = 1 + ((bits - 1) / 8) as u8;
        TrieTop {
            mask,
            count: 0,
            levels,
            top_level: RefAny::NULL,
        }
    }

    /// Descend `levels - 1` interior steps, consuming the key's top byte
    /// first, and return the handle found at the bottom (a leaf, or null if
    /// no leaf has been created for this path yet).
    pub fn lookup(&self, mem: &mut dyn Memory, index: u64) -> RefAny {
        let index = index & self.mask;
        let mut current = self.top_level;
        if self.levels == 1 {
            return current;
        }
        for step in 0..(self.levels - 1) {
            if current.is_null() {
                return RefAny::NULL;
            }
            let shift = 8 * (self.levels as u32 - 1 - step as u32);
            let byte = ((index >> shift) & 0xFF) as usize;
            let node = translate::<InteriorNode>(mem, Ref::from_any(current));
            current = node.children[byte];
        }
        current
    }

    /// Ensure every interior node from the top to the parent of the leaf
    /// containing `index` is scratch, allocating fresh nodes for any null
    /// slot along the way, then write `new_leaf` into the leaf-parent's
    /// slot (or, for a `levels == 1` trie, directly into `top_level`).
    ///
    /// `original_source`'s prototype assumes every interior slot along a
    /// path already exists; it never handles a null child mid-descent. That
    /// assumption doesn't hold for the first insert into a multi-level
    /// trie, so this allocates a fresh zeroed node whenever it meets one
    /// (spec.md's "null children denote empty subtrees" invariant implies
    /// exactly this).
    pub fn cow_path(
        &mut self,
        mem: &mut dyn Memory,
        index: u64,
        new_leaf: RefAny,
    ) -> Result<(), MapError> {
        let index = index & self.mask;

        if self.levels == 1 {
            self.top_level = new_leaf;
            return Ok(());
        }

        enum Parent {
            Top,
            Interior(RefAny, usize),
        }

        let mut current = self.top_level;
        let mut parent = Parent::Top;

        for step in 0..(self.levels - 1) {
            let scratch_ref = if current.is_null() {
                alloc_scratch(mem, InteriorNode::empty())?.as_any()
            } else if !mem.is_writable(current) {
                let node = translate::<InteriorNode>(mem, Ref::from_any(current));
                let new_ref = alloc_scratch(mem, node)?.as_any();
                mem.free(current, std::mem::size_of::<InteriorNode>());
                new_ref
            } else {
                current
            };

            if scratch_ref != current {
                match parent {
                    Parent::Top => self.top_level = scratch_ref,
                    Parent::Interior(pref, idx) => {
                        let mut pnode = translate::<InteriorNode>(mem, Ref::from_any(pref));
                        pnode.children[idx] = scratch_ref;
                        write_back(mem, Ref::from_any(pref), pnode);
                    }
                }
            }

            let shift = 8 * (self.levels as u32 - 1 - step as u32);
            let byte = ((index >> shift) & 0xFF) as usize;

            if step == self.levels - 2 {
                let mut node = translate::<InteriorNode>(mem, Ref::from_any(scratch_ref));
                node.children[byte] = new_leaf;
                write_back(mem, Ref::from_any(scratch_ref), node);
                return Ok(());
            }

            let node = translate::<InteriorNode>(mem, Ref::from_any(scratch_ref));
            current = node.children[byte];
            parent = Parent::Interior(scratch_ref, byte);
        }

        Ok(())
    }

    /// Post-order walk: migrate every writable interior node into a fresh
    /// file-region clone, recursing into children first, then handing the
    /// leaf at the bottom of each path to `committer`. File-region nodes
    /// (and their subtrees) are returned unchanged, since `cow_path`
    /// guarantees a file node's children are themselves never scratch.
    pub fn commit(
        &mut self,
        mem: &mut dyn Memory,
        committer: &mut dyn LeafCommitter,
    ) -> Result<(), MapError> {
        self.top_level = Self::commit_rec(mem, self.top_level, self.levels, committer)?;
        Ok(())
    }

    fn commit_rec(
        mem: &mut dyn Memory,
        r: RefAny,
        levels_remaining: u8,
        committer: &mut dyn LeafCommitter,
    ) -> Result<RefAny, MapError> {
        if r.is_null() {
            return Ok(RefAny::NULL);
        }
        if levels_remaining == 1 {
            return committer.commit(mem, r);
        }
        if !mem.is_writable(r) {
            return Ok(r);
        }

        let node = translate::<InteriorNode>(mem, Ref::from_any(r));
        let mut new_node = InteriorNode::empty();
        for i in 0..256 {
            new_node.children[i] = Self::commit_rec(mem, node.children[i], levels_remaining - 1, committer)?;
        }
        let new_ref = alloc_file(mem, new_node)?.as_any();
        mem.free(r, std::mem::size_of::<InteriorNode>());
        Ok(new_ref)
    }

    /// Depth-first release of all interior nodes. Leaves are never touched
    /// here — the direct map must free them first via [`Self::free_leaves`].
    pub fn free(&mut self, mem: &mut dyn Memory) {
        Self::free_rec(mem, self.top_level, self.levels);
        self.top_level = RefAny::NULL;
        self.count = 0;
    }

    fn free_rec(mem: &mut dyn Memory, r: RefAny, levels_remaining: u8) {
        if r.is_null() || levels_remaining == 1 {
            // levels_remaining == 1 means `r` is itself a leaf: already
            // freed by the direct map, not touched by trie scaffolding
            // teardown.
            return;
        }
        if levels_remaining > 2 {
            let node = translate::<InteriorNode>(mem, Ref::from_any(r));
            for child in node.children {
                Self::free_rec(mem, child, levels_remaining - 1);
            }
        }
        mem.free(r, std::mem::size_of::<InteriorNode>());
    }

    /// Visit every reachable leaf (scratch or file) and hand it to
    /// `freer`, without touching interior-node structure. Must run before
    /// [`Self::free`].
    pub fn free_leaves(&self, mem: &mut dyn Memory, freer: &mut dyn LeafFreer) {
        Self::free_leaves_rec(mem, self.top_level, self.levels, freer);
    }

    fn free_leaves_rec(mem: &mut dyn Memory, r: RefAny, levels_remaining: u8, freer: &mut dyn LeafFreer) {
        if r.is_null() {
            return;
        }
        if levels_remaining == 1 {
            freer.free(mem, r);
            return;
        }
        let node = translate::<InteriorNode>(mem, Ref::from_any(r));
        for child in node.children {
            Self::free_leaves_rec(mem, child, levels_remaining - 1, freer);
        }
    }
}
