use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

struct Bucket<K, V> {
    local_depth: u32,
    items: HashMap<K, V>,
}

struct HashInner<K, V> {
    global_depth: u32,
    /// Directory entries index into `buckets`; several entries may share one
    /// bucket until it splits.
    directory: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

/// Directory-based extendible hash table; the buffer pool uses it as the
/// page_id → frame map. An overflowing bucket splits and rehashes only its
/// own items; the directory doubles only when the splitting bucket is at
/// global depth.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    inner: Mutex<HashInner<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        Self {
            bucket_size: bucket_size.max(1),
            inner: Mutex::new(HashInner {
                global_depth: 0,
                directory: vec![0],
                buckets: vec![Bucket {
                    local_depth: 0,
                    items: HashMap::new(),
                }],
            }),
        }
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let bucket = &inner.buckets[Self::bucket_index(&inner, key)];
        bucket.items.get(key).cloned()
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let idx = Self::bucket_index(&inner, key);
        inner.buckets[idx].items.remove(key).is_some()
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        loop {
            let idx = Self::bucket_index(&inner, &key);
            if inner.buckets[idx].items.contains_key(&key)
                || inner.buckets[idx].items.len() < self.bucket_size
            {
                inner.buckets[idx].items.insert(key, value);
                return;
            }
            Self::split_bucket(&mut inner, idx);
        }
    }

    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    fn hash_key(key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn bucket_index(inner: &HashInner<K, V>, key: &K) -> usize {
        let mask = (1usize << inner.global_depth) - 1;
        inner.directory[(Self::hash_key(key) as usize) & mask]
    }

    fn split_bucket(inner: &mut HashInner<K, V>, idx: usize) {
        if inner.buckets[idx].local_depth == inner.global_depth {
            // Double the directory: the new upper half mirrors the lower.
            let len = inner.directory.len();
            for i in 0..len {
                let target = inner.directory[i];
                inner.directory.push(target);
            }
            inner.global_depth += 1;
        }

        let depth = inner.buckets[idx].local_depth;
        let mask = 1u64 << depth;
        inner.buckets[idx].local_depth = depth + 1;

        // Move the "one" half of the items into a fresh bucket.
        let moved: HashMap<K, V> = {
            let items = &mut inner.buckets[idx].items;
            let keys: Vec<K> = items
                .keys()
                .filter(|k| Self::hash_key(k) & mask != 0)
                .cloned()
                .collect();
            keys.into_iter()
                .map(|k| {
                    let v = items.remove(&k).unwrap();
                    (k, v)
                })
                .collect()
        };
        inner.buckets.push(Bucket {
            local_depth: depth + 1,
            items: moved,
        });
        let new_idx = inner.buckets.len() - 1;

        // Repoint the directory entries whose split bit is set.
        for i in 0..inner.directory.len() {
            if inner.directory[i] == idx && (i as u64) & mask != 0 {
                inner.directory[i] = new_idx;
            }
        }
    }
}
