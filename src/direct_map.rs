//! Direct Map: `u64 -> TEntry` with system-chosen keys, composing the
//! radix trie and the bucket leaf.

use std::marker::PhantomData;

use rand_core::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

use crate::entry::Entry;
use crate::error::MapError;
use crate::leaf;
use crate::memory::{Memory, RefAny};
use crate::trie::{LeafCommitter, LeafFreer, TrieTop};

/// Source of system-chosen 64-bit keys for [`DirectMap::insert`].
///
/// Defaulted to a real PRNG ([`Xoshiro256StarStar`]) in production, per the
/// design note that the original's unseeded `rand()` is inadequate for
/// uniqueness under many insertions. Injectable so tests can drive the
/// deterministic key sequence scenario S3.
pub trait KeySource {
    fn next_key(&mut self) -> u64;
}

impl<R: RngCore> KeySource for R {
    fn next_key(&mut self) -> u64 {
        self.next_u64()
    }
}

/// Builder for a [`DirectMap`], grounded on the teacher's `OpenOptions`.
pub struct DirectMapOptions {
    capacity: u64,
    seed: Option<u64>,
}

impl Default for DirectMapOptions {
    fn default() -> Self {
        Self {
            capacity: 16,
            seed: None,
        }
    }
}

impl DirectMapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target key-space capacity; see `TrieTop::init` for how this derives
    /// `mask`/`levels`.
    pub fn capacity(&mut self, capacity: u64) -> &mut Self {
        self.capacity = capacity;
        self
    }

    /// Seed the key-allocation PRNG, for reproducible test runs.
    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = Some(seed);
        self
    }

    pub fn build<T: Entry>(&self) -> DirectMap<T, Xoshiro256StarStar> {
        let seed = self.seed.unwrap_or_else(entropy_seed);
        DirectMap::with_key_source(self.capacity, Xoshiro256StarStar::seed_from_u64(seed))
    }
}

/// A process-entropy seed for when the caller doesn't supply one, using
/// only what `std` already gives every process (no extra dependency for
/// the one-time case of picking an initial PRNG state).
fn entropy_seed() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish()
}

struct Committer<T>(PhantomData<fn() -> T>);

impl<T: Entry> LeafCommitter for Committer<T> {
    fn commit(&mut self, mem: &mut dyn Memory, leaf: RefAny) -> Result<RefAny, MapError> {
        leaf::commit::<T>(mem, leaf)
    }
}

struct Freer<T>(PhantomData<fn() -> T>);

impl<T: Entry> LeafFreer for Freer<T> {
    fn free(&mut self, mem: &mut dyn Memory, leaf: RefAny) {
        leaf::free::<T>(mem, leaf);
    }
}

/// A persistent `u64 -> T` map with system-chosen keys.
pub struct DirectMap<T, R = Xoshiro256StarStar> {
    trie: TrieTop,
    keys: R,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entry> DirectMap<T, Xoshiro256StarStar> {
    /// Build with the default PRNG key source, entropy-seeded.
    pub fn init(capacity: u64) -> Self {
        DirectMapOptions::new().capacity(capacity).build()
    }
}

impl<T: Entry, R: KeySource> DirectMap<T, R> {
    pub fn with_key_source(capacity: u64, keys: R) -> Self {
        DirectMap {
            trie: TrieTop::init(capacity),
            keys,
            _marker: PhantomData,
        }
    }

    /// Number of entries ever allocated (not decremented; this crate has
    /// no delete operation, matching spec.md's scope).
    pub fn count(&self) -> u64 {
        self.trie.count
    }

    /// Lookup by value. `NotFound` if the key isn't present.
    pub fn get(&self, mem: &mut dyn Memory, key: u64) -> Result<T, MapError> {
        let leaf = self.trie.lookup(mem, key);
        if leaf.is_null() {
            return Err(MapError::NotFound);
        }
        let n = leaf::peek_num_entries(mem, leaf);
        let size = leaf::record_size::<T>(n);
        let buf = mem.bytes(leaf, size);
        let idx = leaf::find::<T>(buf, key).ok_or(MapError::NotFound)?;
        Ok(leaf::entry_payload::<T>(buf, idx))
    }

    /// Lookup returning a live mutable reference into the leaf's payload
    /// slot. The caller must not perform any operation that could
    /// reallocate this leaf (`insert`, `cow_path`) while the reference is
    /// held — the borrow checker enforces this, since both borrow `mem`.
    pub fn get_ref<'a>(&mut self, mem: &'a mut dyn Memory, key: u64) -> Result<&'a mut T, MapError> {
        let leaf = self.trie.lookup(mem, key);
        if leaf.is_null() {
            return Err(MapError::NotFound);
        }
        let n = leaf::peek_num_entries(mem, leaf);
        let size = leaf::record_size::<T>(n);
        let buf = mem.bytes(leaf, size);
        let idx = leaf::find::<T>(buf, key).ok_or(MapError::NotFound)?;
        Ok(leaf::entry_payload_mut::<T>(buf, idx))
    }

    /// Allocate a fresh, system-chosen key and make room for its entry.
    /// The caller should populate the payload via a subsequent
    /// `get_ref(key)` before committing.
    pub fn insert(&mut self, mem: &mut dyn Memory) -> Result<u64, MapError> {
        loop {
            let key = self.keys.next_key();
            let mut leaf = self.trie.lookup(mem, key);
            if leaf.is_null() {
                let empty = leaf::alloc_empty::<T>(mem)?;
                self.trie.cow_path(mem, key, empty)?;
                leaf = empty;
            }

            let n = leaf::peek_num_entries(mem, leaf);
            let prefix = mem.bytes(leaf, leaf::PREFIX_LEN);
            if !leaf::is_empty_at(prefix, key) {
                continue;
            }

            let grown = leaf::grow::<T>(mem, leaf)?;
            self.trie.cow_path(mem, key, grown)?;
            let size = leaf::record_size::<T>(n + 1);
            let buf = mem.bytes(grown, size);
            leaf::insert_at::<T>(buf, key)?;
            self.trie.count += 1;
            return Ok(key);
        }
    }

    /// Idempotently ensure the leaf containing `key` is scratch, without
    /// mutating its contents. `NotFound` if no entry exists at `key`.
    pub fn cow_path(&mut self, mem: &mut dyn Memory, key: u64) -> Result<(), MapError> {
        let leaf = self.trie.lookup(mem, key);
        if leaf.is_null() {
            return Err(MapError::NotFound);
        }
        let n = leaf::peek_num_entries(mem, leaf);
        let size = leaf::record_size::<T>(n);
        {
            let buf = mem.bytes(leaf, size);
            if leaf::find::<T>(buf, key).is_none() {
                return Err(MapError::NotFound);
            }
        }
        if mem.is_writable(leaf) {
            return Ok(());
        }
        let new_leaf = leaf::grow::<T>(mem, leaf)?;
        self.trie.cow_path(mem, key, new_leaf)
    }

    /// Migrate every dirty structure into the file arena, publishing a new
    /// committed root.
    pub fn commit(&mut self, mem: &mut dyn Memory) -> Result<(), MapError> {
        let mut committer = Committer::<T>(PhantomData);
        self.trie.commit(mem, &mut committer)
    }

    /// Release every leaf, then the trie's own interior scaffolding.
    pub fn free(&mut self, mem: &mut dyn Memory) {
        let mut freer = Freer::<T>(PhantomData);
        self.trie.free_leaves(mem, &mut freer);
        self.trie.free(mem);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::{Pod, Zeroable};

    use crate::memory::ArenaMemory;

    #[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq, Eq, Default)]
    #[repr(C)]
    struct Counter(u64);

    impl Entry for Counter {
        fn on_copied_from_file(&mut self, _mem: &mut dyn Memory) {}
        fn on_copied_to_file(&mut self, _mem: &mut dyn Memory) {}
    }

    struct FixedKeySource {
        keys: std::vec::IntoIter<u64>,
    }

    impl FixedKeySource {
        fn new(keys: Vec<u64>) -> Self {
            Self {
                keys: keys.into_iter(),
            }
        }
    }

    impl KeySource for FixedKeySource {
        fn next_key(&mut self) -> u64 {
            self.keys.next().expect("fixed key source exhausted")
        }
    }

    #[test]
    fn s1_init_lookup_empty() {
        let mut mem = ArenaMemory::new();
        let map = DirectMap::<Counter>::init(16);
        assert_eq!(map.trie.levels, 1);
        assert_eq!(map.trie.mask, 15);
        assert_eq!(map.trie.count, 0);
        assert!(map.trie.top_level.is_null());
        assert_eq!(map.get(&mut mem, 0), Err(MapError::NotFound));
    }

    #[test]
    fn s2_single_insert() {
        let mut mem = ArenaMemory::new();
        let mut map = DirectMap::with_key_source(16, FixedKeySource::new(vec![5]));
        let k = map.insert(&mut mem).unwrap();
        assert_eq!(map.count(), 1);
        assert_eq!(map.get(&mut mem, k).unwrap(), Counter::default());
    }

    #[test]
    fn s3_bucket_collision_retry() {
        let mut mem = ArenaMemory::new();
        let mut map =
            DirectMap::with_key_source(1 << 20, FixedKeySource::new(vec![0x100, 0x200, 0x100, 0x300]));
        let k1 = map.insert(&mut mem).unwrap();
        assert_eq!(k1, 0x100);
        let k2 = map.insert(&mut mem).unwrap();
        assert_eq!(k2, 0x200);
        // Third insert()'s first draw, 0x100, collides with k1 (same leaf,
        // same low byte) and must be discarded in favor of the fourth
        // draw, 0x300.
        let k3 = map.insert(&mut mem).unwrap();
        assert_eq!(k3, 0x300);
        assert_eq!(map.count(), 3);
    }

    #[test]
    fn round_trip_property_1() {
        let mut mem = ArenaMemory::new();
        let mut map = DirectMap::<Counter>::init(1 << 20);
        let mut keys = vec![];
        for i in 0..100 {
            let k = map.insert(&mut mem).unwrap();
            *map.get_ref(&mut mem, k).unwrap() = Counter(i);
            keys.push((k, Counter(i)));
        }
        for (k, v) in keys {
            assert_eq!(map.get(&mut mem, k).unwrap(), v);
        }
    }

    #[test]
    fn key_uniqueness_property_6() {
        let mut mem = ArenaMemory::new();
        let mut map = DirectMap::<Counter>::init(1 << 20);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            let k = map.insert(&mut mem).unwrap();
            assert!(seen.insert(k), "insert returned a duplicate key");
        }
    }

    #[test]
    fn commit_transparency_property_2() {
        let mut mem = ArenaMemory::new();
        let mut map = DirectMap::<Counter>::init(256);
        let mut keys = vec![];
        for i in 0..20 {
            let k = map.insert(&mut mem).unwrap();
            *map.get_ref(&mut mem, k).unwrap() = Counter(i);
            keys.push((k, Counter(i)));
        }
        map.commit(&mut mem).unwrap();
        for (k, v) in &keys {
            assert_eq!(map.get(&mut mem, *k).unwrap(), *v);
        }
    }

    #[test]
    fn s4_cow_isolation() {
        let mut mem = ArenaMemory::new();
        let mut map = DirectMap::<Counter>::init(256);
        let mut keys = vec![];
        for i in 0..100 {
            let k = map.insert(&mut mem).unwrap();
            *map.get_ref(&mut mem, k).unwrap() = Counter(i);
            keys.push((k, Counter(i)));
        }
        map.commit(&mut mem).unwrap();
        let root_old = map.trie.top_level;

        let extra = map.insert(&mut mem).unwrap();
        *map.get_ref(&mut mem, extra).unwrap() = Counter(999);

        let old_trie = TrieTop {
            mask: map.trie.mask,
            count: map.trie.count,
            levels: map.trie.levels,
            top_level: root_old,
        };
        for (k, v) in &keys {
            let leaf = old_trie.lookup(&mut mem, *k);
            let n = leaf::peek_num_entries(&mut mem, leaf);
            let size = leaf::record_size::<Counter>(n);
            let buf = mem.bytes(leaf, size);
            let idx = leaf::find::<Counter>(buf, *k).unwrap();
            assert_eq!(leaf::entry_payload::<Counter>(buf, idx), *v);
        }
    }

    #[test]
    fn s6_multilevel_two_permutations() {
        let mut mem = ArenaMemory::new();
        let mut map = DirectMap::<Counter>::init(1 << 20);
        assert_eq!(map.trie.levels, 3);
        assert_eq!(map.trie.mask, 0xFFFFF);

        let mut keys = vec![];
        for i in 0..2000u64 {
            let k = map.insert(&mut mem).unwrap();
            *map.get_ref(&mut mem, k).unwrap() = Counter(i);
            keys.push((k, Counter(i)));
        }

        let order_a = keys.clone();
        let mut order_b = keys.clone();
        order_b.reverse();

        for (k, v) in &order_a {
            assert_eq!(map.get(&mut mem, *k).unwrap(), *v);
        }
        for (k, v) in &order_b {
            assert_eq!(map.get(&mut mem, *k).unwrap(), *v);
        }
    }

    #[test]
    fn cow_path_notfound_on_missing_key() {
        let mut mem = ArenaMemory::new();
        let mut map = DirectMap::<Counter>::init(16);
        assert_eq!(map.cow_path(&mut mem, 42), Err(MapError::NotFound));
    }

    #[test]
    fn free_does_not_panic() {
        let mut mem = ArenaMemory::new();
        let mut map = DirectMap::<Counter>::init(1 << 20);
        for _ in 0..10 {
            map.insert(&mut mem).unwrap();
        }
        map.free(&mut mem);
    }
}
