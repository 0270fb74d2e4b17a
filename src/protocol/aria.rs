// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Aria-FB: a deterministic batch protocol with a three-phase round —
//! read, reservation, commit — separated by barriers.
//! Unlike Sparkle/Spectrum, conflict detection here is purely key-set
//! based (no observed-version bookkeeping), so this engine works
//! directly off each transaction's read/write key sets rather than
//! through [`crate::mvcc`]. The read phase is embarrassingly parallel
//! and is farmed out over `rayon`'s global pool, but reservation and
//! commit are a round-wide barrier, so one driver thread orchestrates
//! rounds rather than a fixed pool of independent executors.

use super::Protocol;
use crate::checkpoint::StorageOp;
use crate::statistics::Statistics;
use crate::table::Table;
use crate::types::{Key, TxId, Word32};
use crate::workload::{Transaction, Workload};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::info;

pub struct Aria {
    workload: Arc<dyn Workload>,
    statistics: Arc<Statistics>,
    values: Arc<Table<Key, Word32>>,
    batch_size: usize,
    reordering: bool,
    stop_flag: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Aria {
    pub fn new(
        workload: Arc<dyn Workload>,
        statistics: Arc<Statistics>,
        batch_size: usize,
        table_partitions: usize,
        reordering: bool,
    ) -> Self {
        info!(batch_size, table_partitions, reordering, "Aria-FB configured");
        Self {
            workload,
            statistics,
            values: Arc::new(Table::new(table_partitions)),
            batch_size: batch_size.max(1),
            reordering,
            stop_flag: Arc::new(AtomicBool::new(false)),
            driver: Mutex::new(None),
        }
    }
}

impl Protocol for Aria {
    fn start(&self) {
        self.stop_flag.store(false, Ordering::SeqCst);
        let workload = self.workload.clone();
        let statistics = self.statistics.clone();
        let values = self.values.clone();
        let batch_size = self.batch_size;
        let reordering = self.reordering;
        let stop_flag = self.stop_flag.clone();
        let handle = std::thread::spawn(move || {
            run_rounds(&workload, &statistics, &values, batch_size, reordering, &stop_flag);
        });
        *self.driver.lock().unwrap() = Some(handle);
    }

    fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.driver.lock().unwrap().take() {
            handle.join().expect("aria driver should not panic");
        }
        info!("Aria-FB stopped");
    }
}

struct PendingTx {
    id: TxId,
    tx: Transaction,
    started_at: Instant,
}

struct ReadResult {
    id: TxId,
    rset: HashSet<Key>,
    wset: HashMap<Key, Word32>,
}

fn execute_read_phase(values: &Table<Key, Word32>, id: TxId, tx: &Transaction) -> ReadResult {
    let mut rset = HashSet::new();
    let mut wset = HashMap::new();
    for op in &tx.program {
        match op {
            StorageOp::Get(k) => {
                rset.insert(*k);
                let _ = values.get(k);
            },
            StorageOp::Put(k, v) => {
                wset.insert(*k, *v);
            },
        }
    }
    ReadResult { id, rset, wset }
}

/// Whether `r`'s writes can commit: either it owns every write-key
/// reservation, or (with reordering) every write-key it was displaced
/// on is one the displacer never reads.
fn can_commit(r: &ReadResult, reservation: &HashMap<Key, TxId>, by_id: &HashMap<TxId, &ReadResult>, reordering: bool) -> bool {
    let war_violation = r.rset.iter().any(|k| reservation.get(k).is_some_and(|&owner| owner < r.id));
    if war_violation {
        return false;
    }
    let owns_every_write = r.wset.keys().all(|k| reservation.get(k) == Some(&r.id));
    if owns_every_write {
        return true;
    }
    if !reordering {
        return false;
    }
    r.wset.keys().all(|k| {
        let owner = reservation[k];
        owner == r.id || !by_id.get(&owner).is_some_and(|displacer| displacer.rset.contains(k))
    })
}

fn run_rounds(
    workload: &Arc<dyn Workload>,
    statistics: &Arc<Statistics>,
    values: &Arc<Table<Key, Word32>>,
    batch_size: usize,
    reordering: bool,
    stop_flag: &Arc<AtomicBool>,
) {
    let mut next_id: TxId = 1;
    let mut pending: Vec<PendingTx> = Vec::new();

    while !stop_flag.load(Ordering::SeqCst) {
        let mut batch = std::mem::take(&mut pending);
        while batch.len() < batch_size {
            let id = next_id;
            next_id += 1;
            batch.push(PendingTx { id, tx: workload.next(), started_at: Instant::now() });
        }

        let results: Vec<ReadResult> =
            batch.par_iter().map(|p| execute_read_phase(values, p.id, &p.tx)).collect();

        let mut reservation: HashMap<Key, TxId> = HashMap::new();
        for r in &results {
            for k in r.wset.keys() {
                reservation
                    .entry(*k)
                    .and_modify(|owner| {
                        if r.id < *owner {
                            *owner = r.id;
                        }
                    })
                    .or_insert(r.id);
            }
        }

        let by_id: HashMap<TxId, &ReadResult> = results.iter().map(|r| (r.id, r)).collect();
        let mut committed: Vec<&ReadResult> =
            results.iter().filter(|r| can_commit(r, &reservation, &by_id, reordering)).collect();
        committed.sort_by_key(|r| r.id);

        for r in &committed {
            for (k, v) in &r.wset {
                values.put(*k, |slot| *slot = *v);
            }
        }

        let committed_ids: HashSet<TxId> = committed.iter().map(|r| r.id).collect();
        for p in batch {
            if committed_ids.contains(&p.id) {
                statistics.journal_execute();
                let ops = by_id[&p.id].rset.len() + by_id[&p.id].wset.len();
                statistics.journal_operations(ops);
                statistics.journal_commit(p.started_at.elapsed());
            } else {
                pending.push(p);
            }
        }
    }
}
