use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageTableError {
    #[error("bucket cannot be split further: keys collide beyond the directory depth")]
    FullBucket,
}

/// Directory growth stops here; a split that would require a deeper
/// directory means the hash function is degenerate for the inserted keys.
const MAX_GLOBAL_DEPTH: u32 = 30;

#[derive(Debug)]
struct Bucket<K, V> {
    local_depth: u32,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: u32) -> Self {
        Self {
            local_depth,
            items: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct HashState<K, V> {
    global_depth: u32,
    bucket_size: usize,
    // Buckets live in an arena; the directory stores arena indices so that
    // aliased directory slots share one bucket without shared-ownership
    // plumbing.
    buckets: Vec<Bucket<K, V>>,
    directory: Vec<usize>,
}

/// Concurrent extendible hash table mapping page ids to frame ids.
///
/// The whole structure sits behind one exclusive latch; the buffer pool
/// holds its own coarse latch while calling in, so this latch is
/// effectively uncontended and splits never race.
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    state: Mutex<HashState<K, V>>,
    hash_builder: S,
}

impl<K, V> ExtendibleHashTable<K, V, RandomState>
where
    K: Hash + Eq + Copy,
    V: Copy,
{
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, RandomState::new())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq + Copy,
    V: Copy,
    S: BuildHasher,
{
    pub fn with_hasher(bucket_size: usize, hash_builder: S) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            state: Mutex::new(HashState {
                global_depth: 0,
                bucket_size,
                buckets: vec![Bucket::new(0)],
                directory: vec![0],
            }),
            hash_builder,
        }
    }

    fn hash_of(&self, key: &K) -> u64 {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn dir_index(&self, key: &K, global_depth: u32) -> usize {
        let mask = (1u64 << global_depth) - 1;
        (self.hash_of(key) & mask) as usize
    }

    /// Look up the value mapped to `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let state = self.state.lock();
        let bucket = &state.buckets[state.directory[self.dir_index(key, state.global_depth)]];
        bucket.items.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    /// Remove the mapping for `key`. Returns whether it existed.
    pub fn remove(&self, key: &K) -> bool {
        let mut state = self.state.lock();
        let bucket_idx = state.directory[self.dir_index(key, state.global_depth)];
        let bucket = &mut state.buckets[bucket_idx];
        if let Some(pos) = bucket.items.iter().position(|(k, _)| k == key) {
            bucket.items.swap_remove(pos);
            true
        } else {
            false
        }
    }

    /// Insert `key -> value`, splitting buckets and doubling the directory
    /// as needed. Returns `Ok(false)` when an existing mapping was
    /// overwritten in place.
    pub fn insert(&self, key: K, value: V) -> Result<bool, PageTableError> {
        let mut state = self.state.lock();
        loop {
            let bucket_idx = state.directory[self.dir_index(&key, state.global_depth)];
            let bucket_size = state.bucket_size;
            let bucket = &mut state.buckets[bucket_idx];

            if let Some(slot) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
                return Ok(false);
            }
            if bucket.items.len() < bucket_size {
                bucket.items.push((key, value));
                return Ok(true);
            }

            self.split_bucket(&mut state, bucket_idx)?;

            // Re-dispatch the pending insert; a further split may be needed
            // if the redistributed keys still collide on low bits. Keys that
            // hash identically on all bits can never be separated, so one
            // futile split is enough to give up.
            let target = state.directory[self.dir_index(&key, state.global_depth)];
            if state.buckets[target].items.len() >= state.bucket_size {
                let pending_hash = self.hash_of(&key);
                if state.buckets[target]
                    .items
                    .iter()
                    .all(|(k, _)| self.hash_of(k) == pending_hash)
                {
                    return Err(PageTableError::FullBucket);
                }
            }
        }
    }

    fn split_bucket(&self, state: &mut HashState<K, V>, bucket_idx: usize) -> Result<(), PageTableError> {
        let local_depth = state.buckets[bucket_idx].local_depth;

        if local_depth == state.global_depth {
            if state.global_depth >= MAX_GLOBAL_DEPTH {
                return Err(PageTableError::FullBucket);
            }
            // Duplicate the directory: each new slot i + 2^d aliases slot i.
            let old_len = state.directory.len();
            for i in 0..old_len {
                let alias = state.directory[i];
                state.directory.push(alias);
            }
            state.global_depth += 1;
        }

        // Allocate the sibling one level deeper and repoint every directory
        // slot whose new high bit selects it.
        let high_bit = 1usize << local_depth;
        let sibling_idx = state.buckets.len();
        state.buckets.push(Bucket::new(local_depth + 1));
        state.buckets[bucket_idx].local_depth = local_depth + 1;

        for slot in 0..state.directory.len() {
            if state.directory[slot] == bucket_idx && slot & high_bit != 0 {
                state.directory[slot] = sibling_idx;
            }
        }

        // Redistribute the original bucket's contents under the new mask.
        let items = std::mem::take(&mut state.buckets[bucket_idx].items);
        for (k, v) in items {
            let target = state.directory[self.dir_index(&k, state.global_depth)];
            state.buckets[target].items.push((k, v));
        }

        Ok(())
    }

    /// Number of mappings in the table.
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.buckets.iter().map(|b| b.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every mapping. Used by the buffer pool to walk resident
    /// pages for flush-all.
    pub fn entries(&self) -> Vec<(K, V)> {
        let state = self.state.lock();
        state
            .buckets
            .iter()
            .flat_map(|b| b.items.iter().copied())
            .collect()
    }

    pub fn global_depth(&self) -> u32 {
        self.state.lock().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let state = self.state.lock();
        state.buckets[state.directory[dir_index]].local_depth
    }

    pub fn num_buckets(&self) -> usize {
        self.state.lock().buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hasher that reports the key bits verbatim, so tests can steer keys
    /// into chosen directory slots.
    #[derive(Clone, Default)]
    struct IdentityState;

    struct IdentityHasher(u64);

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }
        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 = (self.0 << 8) | b as u64;
            }
        }
        fn write_u32(&mut self, n: u32) {
            self.0 = n as u64;
        }
        fn write_u64(&mut self, n: u64) {
            self.0 = n;
        }
        fn write_usize(&mut self, n: usize) {
            self.0 = n as u64;
        }
    }

    impl BuildHasher for IdentityState {
        type Hasher = IdentityHasher;
        fn build_hasher(&self) -> IdentityHasher {
            IdentityHasher(0)
        }
    }

    fn identity_table(bucket_size: usize) -> ExtendibleHashTable<u32, u32, IdentityState> {
        ExtendibleHashTable::with_hasher(bucket_size, IdentityState)
    }

    #[test]
    fn test_insert_find_remove() {
        let table = ExtendibleHashTable::new(4);
        for i in 0u32..64 {
            assert!(table.insert(i, i * 10).unwrap());
        }
        assert_eq!(table.len(), 64);
        for i in 0u32..64 {
            assert_eq!(table.find(&i), Some(i * 10));
        }
        assert!(table.remove(&7));
        assert!(!table.remove(&7));
        assert_eq!(table.find(&7), None);
        assert_eq!(table.len(), 63);
    }

    #[test]
    fn test_insert_overwrites_existing_key() {
        let table = ExtendibleHashTable::new(2);
        assert!(table.insert(1, 10).unwrap());
        assert!(!table.insert(1, 20).unwrap());
        assert_eq!(table.find(&1), Some(20));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_directory_doubling() {
        // bucket_size=2, keys hash to 0b00, 0b10, 0b01, 0b00.
        let table = identity_table(2);

        assert!(table.insert(0b00, 1).unwrap());
        assert!(table.insert(0b10, 2).unwrap());
        assert_eq!(table.global_depth(), 0);

        // Third key overflows the lone bucket: depth 0 -> 1, keys rehash
        // into dir[0]={0b00, 0b10} and dir[1]={0b01}.
        assert!(table.insert(0b01, 3).unwrap());
        assert_eq!(table.global_depth(), 1);
        assert_eq!(table.find(&0b00), Some(1));
        assert_eq!(table.find(&0b10), Some(2));
        assert_eq!(table.find(&0b01), Some(3));

        // A fourth key in slot 0 overflows it again: depth 1 -> 2.
        assert!(table.insert(0b100, 4).unwrap());
        assert_eq!(table.global_depth(), 2);
        for (k, v) in [(0b00u32, 1u32), (0b10, 2), (0b01, 3), (0b100, 4)] {
            assert_eq!(table.find(&k), Some(v));
        }
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_local_depth_tracks_splits() {
        let table = identity_table(2);
        table.insert(0b00, 1).unwrap();
        table.insert(0b10, 2).unwrap();
        table.insert(0b01, 3).unwrap();
        // dir[0] split once, dir[1] is its sibling.
        assert_eq!(table.local_depth(0), 1);
        assert_eq!(table.local_depth(1), 1);
        assert_eq!(table.num_buckets(), 2);
    }

    #[test]
    fn test_degenerate_keys_fail_with_full_bucket() {
        // All keys hash to 0: no split can separate them.
        #[derive(Clone, Default)]
        struct ZeroState;
        struct ZeroHasher;
        impl Hasher for ZeroHasher {
            fn finish(&self) -> u64 {
                0
            }
            fn write(&mut self, _: &[u8]) {}
        }
        impl BuildHasher for ZeroState {
            type Hasher = ZeroHasher;
            fn build_hasher(&self) -> ZeroHasher {
                ZeroHasher
            }
        }

        let table: ExtendibleHashTable<u32, u32, ZeroState> =
            ExtendibleHashTable::with_hasher(2, ZeroState);
        assert!(table.insert(1, 1).unwrap());
        assert!(table.insert(2, 2).unwrap());
        assert!(matches!(table.insert(3, 3), Err(PageTableError::FullBucket)));
    }
}
