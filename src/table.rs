// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Generic sharded associative store, the base every protocol table is
//! built on: fixed partition count chosen at construction, one mutex
//! per shard, never held across a callback that could touch another
//! table.

use parking_lot::Mutex;
use std::{
    collections::HashMap,
    hash::{Hash, Hasher},
};

pub(crate) fn shard_of<K: Hash>(key: &K, num_shards: usize) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % num_shards
}

/// A `K -> V` map sharded across `P` partitions, each guarded by its own
/// mutex. `Get`/`Put` never hold the shard lock across a user callback
/// that could itself acquire another table's lock.
pub struct Table<K, V> {
    shards: Vec<Mutex<HashMap<K, V>>>,
}

impl<K, V> Table<K, V>
where
    K: Hash + Eq + Clone,
    V: Default + Clone,
{
    pub fn new(partitions: usize) -> Self {
        let partitions = partitions.max(1);
        Self {
            shards: (0..partitions).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Reads the value at `k`, or the type's default if absent.
    pub fn get(&self, k: &K) -> V {
        let shard = shard_of(k, self.shards.len());
        let guard = self.shards[shard].lock();
        guard.get(k).cloned().unwrap_or_default()
    }

    /// Applies `mutate` to the (possibly just-defaulted) slot for `k`
    /// under the shard lock, exactly once.
    pub fn put(&self, k: K, mutate: impl FnOnce(&mut V)) {
        let shard = shard_of(&k, self.shards.len());
        let mut guard = self.shards[shard].lock();
        let slot = guard.entry(k).or_default();
        mutate(slot);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{Key, Word32};
    use proptest::prelude::*;

    proptest! {
        // Put(k, set(x)) then Get(k) must yield x for any key and value,
        // not just the hand-picked ones above.
        #[test]
        fn put_then_get_observes_the_written_value(k: Key, v: Word32) {
            let t: Table<Key, Word32> = Table::new(4);
            t.put(k, |slot| *slot = v);
            prop_assert_eq!(t.get(&k), v);
        }
    }

    #[test]
    fn roundtrip() {
        let t: Table<u64, u64> = Table::new(4);
        t.put(7, |v| *v = 42);
        assert_eq!(t.get(&7), 42);
    }

    #[test]
    fn missing_key_is_default() {
        let t: Table<u64, u64> = Table::new(4);
        assert_eq!(t.get(&1), 0);
    }

    #[test]
    fn distinct_keys_independent() {
        let t: Table<u64, u64> = Table::new(8);
        for i in 0..100u64 {
            t.put(i, |v| *v = i * 2);
        }
        for i in 0..100u64 {
            assert_eq!(t.get(&i), i * 2);
        }
    }
}
