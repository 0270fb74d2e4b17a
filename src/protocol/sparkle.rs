// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! The Sparkle / Spectrum engine: speculative multi-version execution
//! with a strict commit-order gate. Each worker assigns its own id via
//! `last_execute`, installs storage handlers once per attempt, runs to
//! completion, and gates on commit order (`last_commit`) before
//! retiring — re-entering the rerun loop if invalidated while waiting;
//! a shared `stop_flag` tells every worker when to exit.
//!
//! Sparkle and Spectrum are the same engine here: which one you get is
//! purely a function of the workload's [`EvmType`]. `Basic` makes every
//! checkpoint a no-op, so a conflict always restarts the transaction
//! from its first operation — that is `Sparkle`. `Strawman` and
//! `CopyOnWrite` make every checkpoint real, so a conflict resumes only
//! from the earliest invalidated operation — that is `Spectrum` /
//! `SparklePartial`. [`CheckpointedTx`] already encodes this
//! dichotomy, so one engine implementation covers both names without
//! duplicating the executor loop.

use super::Protocol;
use crate::checkpoint::{CheckpointedTx, EvmType};
use crate::mvcc::{self, MvccTable, MvccTransaction, TxRegistry};
use crate::statistics::Statistics;
use crate::types::TxId;
use crate::workload::Workload;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::info;

pub struct Sparkle {
    workload: Arc<dyn Workload>,
    statistics: Arc<Statistics>,
    table: Arc<MvccTable>,
    registry: Arc<TxRegistry>,
    last_execute: Arc<AtomicU64>,
    last_committed: Arc<AtomicU64>,
    num_executors: usize,
    stop_flag: Arc<AtomicBool>,
    executors: Mutex<Vec<JoinHandle<()>>>,
}

/// `Spectrum` and `SparklePartial` name the same engine as `Sparkle`
/// here; see the module documentation.
pub type Spectrum = Sparkle;

impl Sparkle {
    pub fn new(
        workload: Arc<dyn Workload>,
        statistics: Arc<Statistics>,
        num_executors: usize,
        table_partitions: usize,
        evm_type: EvmType,
    ) -> Self {
        info!(num_executors, table_partitions, ?evm_type, "Sparkle configured");
        workload.set_evm_type(evm_type);
        Self {
            workload,
            statistics,
            table: Arc::new(MvccTable::new(table_partitions)),
            registry: Arc::new(TxRegistry::new()),
            last_execute: Arc::new(AtomicU64::new(1)),
            last_committed: Arc::new(AtomicU64::new(0)),
            num_executors: num_executors.max(1),
            stop_flag: Arc::new(AtomicBool::new(false)),
            executors: Mutex::new(Vec::new()),
        }
    }
}

impl Protocol for Sparkle {
    fn start(&self) {
        self.stop_flag.store(false, Ordering::SeqCst);
        let mut executors = self.executors.lock().unwrap();
        for _ in 0..self.num_executors {
            let workload = self.workload.clone();
            let statistics = self.statistics.clone();
            let table = self.table.clone();
            let registry = self.registry.clone();
            let last_execute = self.last_execute.clone();
            let last_committed = self.last_committed.clone();
            let stop_flag = self.stop_flag.clone();
            executors.push(std::thread::spawn(move || {
                run_executor(&workload, &statistics, &table, &registry, &last_execute, &last_committed, &stop_flag);
            }));
        }
    }

    fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        for handle in self.executors.lock().unwrap().drain(..) {
            handle.join().expect("sparkle executor should not panic");
        }
        info!("Sparkle stopped");
    }
}

#[allow(clippy::too_many_arguments)]
fn run_executor(
    workload: &Arc<dyn Workload>,
    statistics: &Arc<Statistics>,
    table: &Arc<MvccTable>,
    registry: &Arc<TxRegistry>,
    last_execute: &Arc<AtomicU64>,
    last_committed: &Arc<AtomicU64>,
    stop_flag: &Arc<AtomicBool>,
) {
    while !stop_flag.load(Ordering::SeqCst) {
        let id: TxId = last_execute.fetch_add(1, Ordering::SeqCst);
        let tx_state = Arc::new(MvccTransaction::new(id));
        registry.insert(id, tx_state.clone());

        let source = workload.next();
        let mut session = CheckpointedTx::new(source.evm_type, source.program);

        let get_table = table.clone();
        let get_tx = tx_state.clone();
        session.install_get_storage(Box::new(move |ctx, key| {
            let op_index = ctx.make_checkpoint();
            get_table.get(&get_tx, *key, op_index)
        }));
        let put_table = table.clone();
        let put_tx = tx_state.clone();
        let put_registry = registry.clone();
        session.install_set_storage(Box::new(move |ctx, key, value| {
            let op_index = ctx.make_checkpoint();
            put_table.put(&put_tx, &put_registry, *key, *value, op_index);
        }));

        let start = Instant::now();
        let aborted = run_attempts(&mut session, &tx_state, table, registry, last_committed, stop_flag, id);

        if !aborted {
            mvcc::clear(table, &tx_state, true);
            last_committed.store(id, Ordering::SeqCst);
            statistics.journal_execute();
            statistics.journal_operations(session.count_operations());
            statistics.journal_commit(start.elapsed());
        } else {
            mvcc::clear(table, &tx_state, false);
        }
        registry.remove(&id);
    }
}

/// Runs `session` to completion, re-running from the earliest
/// conflicting operation every time the transaction is invalidated, then
/// spins at the commit-order gate — itself re-entering the rerun loop
/// if invalidated while waiting. Returns `true` if the caller should
/// discard the transaction because `stop_flag` was observed instead of
/// committing.
#[allow(clippy::too_many_arguments)]
fn run_attempts(
    session: &mut CheckpointedTx,
    tx_state: &Arc<MvccTransaction>,
    table: &Arc<MvccTable>,
    registry: &Arc<TxRegistry>,
    last_committed: &Arc<AtomicU64>,
    stop_flag: &Arc<AtomicBool>,
    id: TxId,
) -> bool {
    'attempt: loop {
        if stop_flag.load(Ordering::SeqCst) {
            return true;
        }
        session.execute();

        loop {
            if tx_state.take_rerun() {
                let resume_at = mvcc::prepare_partial_rerun(table, registry, tx_state).unwrap_or(0);
                session.apply_checkpoint(resume_at);
                continue 'attempt;
            }
            if last_committed.load(Ordering::SeqCst) + 1 == id {
                return false;
            }
            if stop_flag.load(Ordering::SeqCst) {
                return true;
            }
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::workload::ycsb::Ycsb;
    use std::time::Duration;

    #[test]
    fn commits_transactions_under_contention_with_basic_full_rerun() {
        // Small key space forces heavy contention, exercising the full
        // invalidate/rerun cycle under Basic (full-restart) checkpoints.
        let workload = Ycsb::arc(4, 0.0).unwrap();
        let statistics = Arc::new(Statistics::new(4));
        let sparkle = Sparkle::new(workload, statistics.clone(), 4, 8, EvmType::Basic);

        sparkle.start();
        std::thread::sleep(Duration::from_millis(100));
        sparkle.stop();

        assert!(statistics.commit_count() > 0);
    }

    #[test]
    fn commits_transactions_under_contention_with_partial_rerun() {
        let workload = Ycsb::arc(4, 0.0).unwrap();
        let statistics = Arc::new(Statistics::new(4));
        let spectrum: Spectrum = Sparkle::new(workload, statistics.clone(), 4, 8, EvmType::CopyOnWrite);

        spectrum.start();
        std::thread::sleep(Duration::from_millis(100));
        spectrum.stop();

        assert!(statistics.commit_count() > 0);
    }

    #[test]
    fn low_contention_wide_keyspace_commits_most_transactions_without_rerun() {
        let workload = Ycsb::arc(1_000_000, 0.0).unwrap();
        let statistics = Arc::new(Statistics::new(2));
        let sparkle = Sparkle::new(workload, statistics.clone(), 2, 16, EvmType::Strawman);

        sparkle.start();
        std::thread::sleep(Duration::from_millis(50));
        sparkle.stop();

        assert!(statistics.commit_count() > 0);
    }
}
