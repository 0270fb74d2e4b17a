// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! The simplest baseline: one worker thread, no contention, a plain
//! table, a checkpoint taken right before every storage access so the
//! checkpointing contract is always exercised even with nothing to
//! invalidate it.

use super::Protocol;
use crate::checkpoint::{CheckpointedTx, EvmType};
use crate::statistics::Statistics;
use crate::table::Table;
use crate::types::{Key, Word32};
use crate::workload::Workload;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::info;

pub struct Serial {
    workload: Arc<dyn Workload>,
    statistics: Arc<Statistics>,
    table: Arc<Table<Key, Word32>>,
    stop_flag: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Serial {
    pub fn new(workload: Arc<dyn Workload>, statistics: Arc<Statistics>, evm_type: EvmType) -> Self {
        workload.set_evm_type(evm_type);
        Self {
            workload,
            statistics,
            table: Arc::new(Table::new(1)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }
}

impl Protocol for Serial {
    fn start(&self) {
        info!("Serial starting");
        let workload = self.workload.clone();
        let statistics = self.statistics.clone();
        let table = self.table.clone();
        let stop_flag = self.stop_flag.clone();
        stop_flag.store(false, Ordering::SeqCst);

        let handle = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                let tx = workload.next();
                let mut session = CheckpointedTx::new(tx.evm_type, tx.program);
                let get_table = table.clone();
                session.install_get_storage(Box::new(move |ctx, key| {
                    ctx.make_checkpoint();
                    get_table.get(key)
                }));
                let put_table = table.clone();
                session.install_set_storage(Box::new(move |_ctx, key, value| {
                    put_table.put(*key, |slot| *slot = *value);
                }));

                let start = Instant::now();
                session.execute();
                statistics.journal_execute();
                statistics.journal_operations(session.count_operations());
                statistics.journal_commit(start.elapsed());
            }
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.join().expect("serial worker should not panic");
        }
        info!("Serial stopped");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::workload::ycsb::Ycsb;
    use std::time::Duration;

    // Start, sleep, Stop returns promptly and
    // statistics reflect only the work done before the stop.
    #[test]
    fn start_sleep_stop_returns_promptly_and_journals_work() {
        let workload = Ycsb::arc(1000, 1.0).unwrap();
        let statistics = Arc::new(Statistics::new(1));
        let serial = Serial::new(workload, statistics.clone(), EvmType::Strawman);

        serial.start();
        std::thread::sleep(Duration::from_millis(50));
        serial.stop();

        assert!(statistics.commit_count() > 0);
    }
}
