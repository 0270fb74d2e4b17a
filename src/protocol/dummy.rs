// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Upper-bound throughput baseline: a fixed pool of workers execute
//! against one shared table with no conflict detection whatsoever —
//! whichever write lands last wins.

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

pub struct Dummy {
    workload: Arc<dyn Workload>,
    statistics: Arc<Statistics>,
    table: Arc<Table<Key, Word32>>,
    num_threads: usize,
    stop_flag: Arc<AtomicBool>,
    executors: Mutex<Vec<JoinHandle<()>>>,
}

impl Dummy {
    pub fn new(
        workload: Arc<dyn Workload>,
        statistics: Arc<Statistics>,
        num_threads: usize,
        table_partitions: usize,
        evm_type: EvmType,
    ) -> Self {
        info!(num_threads, table_partitions, "Dummy configured");
        workload.set_evm_type(evm_type);
        Self {
            workload,
            statistics,
            table: Arc::new(Table::new(table_partitions)),
            num_threads: num_threads.max(1),
            stop_flag: Arc::new(AtomicBool::new(false)),
            executors: Mutex::new(Vec::new()),
        }
    }
}

impl Protocol for Dummy {
    fn start(&self) {
        self.stop_flag.store(false, Ordering::SeqCst);
        let mut executors = self.executors.lock().unwrap();
        for _ in 0..self.num_threads {
            let workload = self.workload.clone();
            let statistics = self.statistics.clone();
            let table = self.table.clone();
            let stop_flag = self.stop_flag.clone();
            executors.push(std::thread::spawn(move || {
                while !stop_flag.load(Ordering::SeqCst) {
                    let tx = workload.next();
                    let mut session = CheckpointedTx::new(tx.evm_type, tx.program);
                    let get_table = table.clone();
                    session.install_get_storage(Box::new(move |_ctx, key| get_table.get(key)));
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
            }));
        }
    }

    fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        for handle in self.executors.lock().unwrap().drain(..) {
            handle.join().expect("dummy worker should not panic");
        }
        info!("Dummy stopped");
    }
}
