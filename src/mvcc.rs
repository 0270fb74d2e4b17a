// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! The multi-version table underlying the Sparkle and Spectrum engines.
//!
//! A key's chain is ordered by writer `TxId`. Besides the entries
//! themselves, a chain remembers the set of readers that observed the
//! *default* (pre-chain) value as `default_readers` — readers of a
//! version that, at read time, does not yet have an entry. Treating the
//! default as a first-class reader set (rather than only tracking
//! readers per existing entry) is what lets a `Put` by the oldest writer
//! into an otherwise-empty chain still retroactively invalidate an
//! already-recorded default reader.
//!
//! Transaction objects are looked up by `TxId` through a `TxRegistry`
//! rather than held by strong reference from inside the chain, so a
//! chain's reader sets never keep a transaction alive past its own
//! worker thread dropping it.

use crate::table::shard_of;
use crate::types::{Key, TxId, Word32};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::atomic::{AtomicBool, Ordering},
};

/// Looks transactions up by id without owning them past the registering
/// worker's lifetime; entries are removed once a transaction commits or
/// aborts (see `MvccTable::forget`).
pub type TxRegistry = dashmap::DashMap<TxId, std::sync::Arc<MvccTransaction>>;

#[derive(Default)]
struct VersionEntry {
    value: Word32,
    readers: HashSet<TxId>,
}

#[derive(Default)]
struct KeyChain {
    default_readers: HashSet<TxId>,
    entries: BTreeMap<TxId, VersionEntry>,
}

impl KeyChain {
    /// Writer of the greatest entry with `writer < tx_id`, if any.
    fn visible_writer(&self, tx_id: TxId) -> Option<TxId> {
        self.entries.range(..tx_id).next_back().map(|(&w, _)| w)
    }
}

/// One logged `Get`: the key read, the value and version observed, and
/// the op index it occurred at (needed to find the earliest affected op
/// on invalidation).
#[derive(Clone, Copy)]
pub struct GetLog {
    pub key: Key,
    pub value: Word32,
    /// Writer id observed, or `0` for the default (pre-chain) value.
    pub version: TxId,
    pub op_index: usize,
}

#[derive(Clone, Copy)]
pub struct PutLog {
    pub key: Key,
    pub op_index: usize,
}

/// The bookkeeping a Sparkle/Spectrum worker keeps for one in-flight
/// transaction attempt: its read/write logs (`tuples_get`/`tuples_put`,
/// for regret/clear) and the rerun signal a conflicting `Put` elsewhere
/// raises asynchronously.
pub struct MvccTransaction {
    pub id: TxId,
    rerun_flag: AtomicBool,
    rerun_keys: Mutex<HashSet<Key>>,
    tuples_get: Mutex<Vec<GetLog>>,
    tuples_put: Mutex<Vec<PutLog>>,
}

impl MvccTransaction {
    pub fn new(id: TxId) -> Self {
        Self {
            id,
            rerun_flag: AtomicBool::new(false),
            rerun_keys: Mutex::new(HashSet::new()),
            tuples_get: Mutex::new(Vec::new()),
            tuples_put: Mutex::new(Vec::new()),
        }
    }

    pub fn has_war(&self) -> bool {
        self.rerun_flag.load(Ordering::SeqCst)
    }

    fn mark_rerun(&self, key: Key) {
        self.rerun_keys.lock().insert(key);
        self.rerun_flag.store(true, Ordering::SeqCst);
    }

    /// Clears the rerun signal, returning whether it had been set.
    pub fn take_rerun(&self) -> bool {
        self.rerun_flag.swap(false, Ordering::SeqCst)
    }

    pub fn gets(&self) -> Vec<GetLog> {
        self.tuples_get.lock().clone()
    }

    pub fn puts(&self) -> Vec<PutLog> {
        self.tuples_put.lock().clone()
    }

    /// Earliest op index touching a key currently marked for rerun, the
    /// point `ApplyCheckpoint` should roll back to.
    pub fn earliest_rerun_op_index(&self) -> Option<usize> {
        let dirty = self.rerun_keys.lock();
        if dirty.is_empty() {
            return None;
        }
        let from_gets = self.tuples_get.lock().iter().filter(|g| dirty.contains(&g.key)).map(|g| g.op_index).min();
        let from_puts = self.tuples_put.lock().iter().filter(|p| dirty.contains(&p.key)).map(|p| p.op_index).min();
        match (from_gets, from_puts) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Drops logged reads/writes at or after `op_index` and the rerun
    /// keys they were flagged under, ready for a partial re-execution
    /// from that point.
    fn truncate_logs(&self, op_index: usize) {
        self.tuples_get.lock().retain(|g| g.op_index < op_index);
        self.tuples_put.lock().retain(|p| p.op_index < op_index);
        self.rerun_keys.lock().clear();
    }

    /// Resets every log, for a full (non-partial) rerun from op 0.
    fn reset(&self) {
        self.tuples_get.lock().clear();
        self.tuples_put.lock().clear();
        self.rerun_keys.lock().clear();
        self.rerun_flag.store(false, Ordering::SeqCst);
    }
}

/// The sharded version-chain store itself. One mutex per shard, held
/// only across the local chain mutation — invalidation is computed
/// while holding the lock but applied to the affected transactions
/// (via the registry) only after it is released, so no transaction's
/// internal lock is ever taken while a shard lock is held.
pub struct MvccTable {
    shards: Vec<Mutex<HashMap<Key, KeyChain>>>,
}

impl MvccTable {
    pub fn new(partitions: usize) -> Self {
        let partitions = partitions.max(1);
        Self {
            shards: (0..partitions).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    /// `Get(tx, k)`: reads the visible version, records
    /// the caller as a reader of it (or of the default), and appends to
    /// `tx.tuples_get`.
    pub fn get(&self, tx: &MvccTransaction, key: Key, op_index: usize) -> Word32 {
        let shard_idx = shard_of(&key, self.shards.len());
        let mut shard = self.shards[shard_idx].lock();
        let chain = shard.entry(key).or_default();
        let (value, version) = match chain.visible_writer(tx.id) {
            Some(writer) => {
                let entry = chain.entries.get_mut(&writer).expect("writer came from this chain");
                entry.readers.insert(tx.id);
                (entry.value, writer)
            },
            None => {
                chain.default_readers.insert(tx.id);
                (Word32::default(), 0)
            },
        };
        drop(shard);
        tx.tuples_get.lock().push(GetLog { key, value, version, op_index });
        value
    }

    /// `Put(tx, k, v)`. Every reader observed a version
    /// strictly older than `tx.id` and is itself younger than `tx.id` is
    /// reading a value this write supersedes and is marked for rerun.
    /// The default reader set is treated as an implicit version-0 entry
    /// so an insertion into an empty chain still invalidates a reader
    /// that recorded the default.
    pub fn put(&self, tx: &MvccTransaction, registry: &TxRegistry, key: Key, value: Word32, op_index: usize) {
        let shard_idx = shard_of(&key, self.shards.len());
        let mut shard = self.shards[shard_idx].lock();
        let chain = shard.entry(key).or_default();

        let mut to_invalidate = Vec::new();
        for &reader in chain.default_readers.iter() {
            if reader > tx.id {
                to_invalidate.push(reader);
            }
        }
        for (&writer, entry) in chain.entries.iter() {
            if writer < tx.id {
                for &reader in entry.readers.iter() {
                    if reader > tx.id {
                        to_invalidate.push(reader);
                    }
                }
            }
        }
        chain.entries.insert(tx.id, VersionEntry { value, readers: HashSet::new() });
        drop(shard);

        for reader_id in to_invalidate {
            if let Some(reader) = registry.get(&reader_id) {
                reader.mark_rerun(key);
            }
        }
        tx.tuples_put.lock().push(PutLog { key, op_index });
    }

    /// Drops `tx`'s reader registration for a previously logged `Get`,
    /// without cascading — used both by regret (partial rollback) and
    /// by clear (commit/abort).
    pub fn forget_read(&self, tx_id: TxId, key: Key, version: TxId) {
        let shard_idx = shard_of(&key, self.shards.len());
        let mut shard = self.shards[shard_idx].lock();
        let Some(chain) = shard.get_mut(&key) else { return };
        if version == 0 {
            chain.default_readers.remove(&tx_id);
        } else if let Some(entry) = chain.entries.get_mut(&version) {
            entry.readers.remove(&tx_id);
        }
    }

    /// Removes `tx`'s version entry for `key` on regret (partial
    /// rollback) or abort, cascading a rerun to any reader that had
    /// observed exactly this version — they read a value that no
    /// longer exists.
    pub fn regret_write(&self, tx_id: TxId, registry: &TxRegistry, key: Key) {
        let shard_idx = shard_of(&key, self.shards.len());
        let mut shard = self.shards[shard_idx].lock();
        let Some(chain) = shard.get_mut(&key) else { return };
        let Some(entry) = chain.entries.remove(&tx_id) else { return };
        drop(shard);
        for reader_id in entry.readers {
            if let Some(reader) = registry.get(&reader_id) {
                reader.mark_rerun(key);
            }
        }
    }

    /// Commit-time clear of a write: the entry stays in the chain as
    /// the committed version, nothing to remove.
    pub fn clear_write(&self, _tx_id: TxId, _key: Key) {}
}

/// Rolls `tx` back to the earliest op its rerun keys touch, releasing
/// every reader/writer registration at or after that point, and
/// reports the op index execution should resume from. Returns `None`
/// if `tx` is not currently marked for rerun.
pub fn prepare_partial_rerun(table: &MvccTable, registry: &TxRegistry, tx: &MvccTransaction) -> Option<usize> {
    let op_index = tx.earliest_rerun_op_index()?;
    for g in tx.gets() {
        if g.op_index >= op_index {
            table.forget_read(tx.id, g.key, g.version);
        }
    }
    for p in tx.puts() {
        if p.op_index >= op_index {
            table.regret_write(tx.id, registry, p.key);
        }
    }
    tx.truncate_logs(op_index);
    Some(op_index)
}

/// Full rerun from scratch (the plain `Sparkle` variant, or `Basic` EVM
/// mode under `Spectrum`/`SparklePartial`): releases every registration
/// this attempt made and clears all logs.
pub fn prepare_full_rerun(table: &MvccTable, registry: &TxRegistry, tx: &MvccTransaction) {
    for g in tx.gets() {
        table.forget_read(tx.id, g.key, g.version);
    }
    for p in tx.puts() {
        table.regret_write(tx.id, registry, p.key);
    }
    tx.reset();
}

/// Releases every registration a committed or aborted transaction made,
/// without cascading rerun.
pub fn clear(table: &MvccTable, tx: &MvccTransaction, committed: bool) {
    for g in tx.gets() {
        table.forget_read(tx.id, g.key, g.version);
    }
    if !committed {
        for p in tx.puts() {
            // Aborting before ever being read by anyone else: safe to
            // drop without cascading, matching "clear" semantics.
            let shard_idx = shard_of(&p.key, table.shards.len());
            let mut shard = table.shards[shard_idx].lock();
            if let Some(chain) = shard.get_mut(&p.key) {
                chain.entries.remove(&tx.id);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{Address20, Slot32};
    use claims::{assert_none, assert_some_eq};
    use std::sync::Arc;

    fn key0() -> Key {
        (Address20::from_u8(0), Slot32::from_index(0))
    }

    fn registry_with(txs: &[Arc<MvccTransaction>]) -> TxRegistry {
        let reg = TxRegistry::new();
        for tx in txs {
            reg.insert(tx.id, tx.clone());
        }
        reg
    }

    // t0=1 (oldest), t1=2, t2=3 (newest). t2 reads the default; t0 then
    // t1 write. t2 must end up flagged for rerun; t0 and t1 must not be.
    #[test]
    fn war_invalidation_flags_only_the_stale_reader() {
        let table = MvccTable::new(4);
        let t0 = Arc::new(MvccTransaction::new(1));
        let t1 = Arc::new(MvccTransaction::new(2));
        let t2 = Arc::new(MvccTransaction::new(3));
        let reg = registry_with(&[t0.clone(), t1.clone(), t2.clone()]);
        let k0 = key0();

        table.get(&t2, k0, 0);
        table.put(&t0, &reg, k0, Word32::from_u64(2), 0);
        table.put(&t1, &reg, k0, Word32::from_u64(0), 0);

        assert!(t2.has_war());
        assert!(!t0.has_war());
        assert!(!t1.has_war());
    }

    // t1 writes; t2 reads t1's version; t0 (older than t1) then writes.
    // t2 already observed a version newer than t0's write and must
    // stay valid.
    #[test]
    fn waw_does_not_invalidate_reader_of_newer_writer() {
        let table = MvccTable::new(4);
        let t0 = Arc::new(MvccTransaction::new(1));
        let t1 = Arc::new(MvccTransaction::new(2));
        let t2 = Arc::new(MvccTransaction::new(3));
        let reg = registry_with(&[t0.clone(), t1.clone(), t2.clone()]);
        let k0 = key0();

        table.put(&t1, &reg, k0, Word32::from_u64(0), 0);
        table.get(&t2, k0, 0);
        table.put(&t0, &reg, k0, Word32::from_u64(2), 0);

        assert!(!t2.has_war());
        assert!(!t0.has_war());
        assert!(!t1.has_war());
    }

    #[test]
    fn get_after_put_observes_the_written_value() {
        let table = MvccTable::new(4);
        let t0 = Arc::new(MvccTransaction::new(1));
        let t1 = Arc::new(MvccTransaction::new(2));
        let reg = registry_with(&[t0.clone(), t1.clone()]);
        let k0 = key0();

        table.put(&t0, &reg, k0, Word32::from_u64(42), 0);
        let v = table.get(&t1, k0, 0);
        assert_eq!(v.as_u64(), 42);
    }

    #[test]
    fn get_before_any_write_observes_default() {
        let table = MvccTable::new(4);
        let t0 = Arc::new(MvccTransaction::new(1));
        let reg = registry_with(&[t0.clone()]);
        let v = table.get(&t0, key0(), 0);
        assert_eq!(v.as_u64(), 0);
    }

    // Regret cascades: t1 reads t0's write; t0 regrets (rolls back) that
    // write; t1 must now be flagged for rerun since its observed version
    // no longer exists.
    #[test]
    fn regret_write_cascades_rerun_to_dependent_reader() {
        let table = MvccTable::new(4);
        let t0 = Arc::new(MvccTransaction::new(1));
        let t1 = Arc::new(MvccTransaction::new(2));
        let reg = registry_with(&[t0.clone(), t1.clone()]);
        let k0 = key0();

        table.put(&t0, &reg, k0, Word32::from_u64(7), 0);
        table.get(&t1, k0, 0);
        assert!(!t1.has_war());

        table.regret_write(t0.id, &reg, k0);
        assert!(t1.has_war());
    }

    #[test]
    fn prepare_partial_rerun_truncates_logs_from_earliest_dirty_op() {
        let table = MvccTable::new(4);
        let t0 = Arc::new(MvccTransaction::new(1));
        let t1 = Arc::new(MvccTransaction::new(2));
        let t2 = Arc::new(MvccTransaction::new(3));
        let reg = registry_with(&[t0.clone(), t1.clone(), t2.clone()]);
        let k0 = key0();

        table.get(&t2, k0, 0);
        table.put(&t0, &reg, k0, Word32::from_u64(2), 1);

        assert_some_eq!(prepare_partial_rerun(&table, &reg, &t2), 0);
        assert!(t2.gets().is_empty());
    }

    #[test]
    fn prepare_partial_rerun_is_none_for_an_untouched_transaction() {
        let table = MvccTable::new(4);
        let t0 = Arc::new(MvccTransaction::new(1));
        let reg = registry_with(&[t0.clone()]);

        assert_none!(prepare_partial_rerun(&table, &reg, &t0));
    }
}
