// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! The benchmark driver: parse a [`BenchConfig`], wire up the chosen
//! workload and protocol, run it for the configured duration, print the
//! statistics report. CLI parsing and thread pinning stay thin; the
//! protocol engines and workloads do the actual work.

use clap::Parser;
use occ_sched::checkpoint::EvmType;
use occ_sched::config::{BenchArgs, BenchConfig, ProtocolKind, WorkloadKind};
use occ_sched::protocol::aria::Aria;
use occ_sched::protocol::calvin::Calvin;
use occ_sched::protocol::dummy::Dummy;
use occ_sched::protocol::serial::Serial;
use occ_sched::protocol::sparkle::Sparkle;
use occ_sched::protocol::Protocol;
use occ_sched::statistics::Statistics;
use occ_sched::workload::smallbank::Smallbank;
use occ_sched::workload::ycsb::Ycsb;
use occ_sched::workload::Workload;
use std::sync::Arc;
use tracing::info;

fn build_workload(cfg: &BenchConfig) -> anyhow::Result<Arc<dyn Workload>> {
    let workload = match cfg.workload {
        WorkloadKind::Ycsb => Ycsb::arc(cfg.key_space, cfg.zipf_exponent)?,
        WorkloadKind::Smallbank => Smallbank::arc(cfg.key_space, cfg.zipf_exponent)?,
    };
    Ok(workload)
}

fn build_protocol(cfg: &BenchConfig, workload: Arc<dyn Workload>, statistics: Arc<Statistics>) -> Box<dyn Protocol> {
    match cfg.protocol {
        ProtocolKind::Serial => Box::new(Serial::new(workload, statistics, cfg.evm_type)),
        ProtocolKind::Sparkle | ProtocolKind::Spectrum => {
            // Spectrum is Sparkle run with a checkpoint mode that makes
            // partial rollback real; Basic degenerates to full-restart
            // Sparkle (protocol/sparkle.rs module docs).
            let evm_type = if cfg.protocol == ProtocolKind::Spectrum && cfg.evm_type == EvmType::Basic {
                EvmType::Strawman
            } else {
                cfg.evm_type
            };
            Box::new(Sparkle::new(workload, statistics, cfg.workers, cfg.table_partitions, evm_type))
        },
        ProtocolKind::Aria => Box::new(Aria::new(workload, statistics, cfg.batch_size, cfg.table_partitions, cfg.reordering)),
        ProtocolKind::Calvin => Box::new(Calvin::new(workload, statistics, cfg.workers, cfg.dispatchers, cfg.table_partitions)),
        ProtocolKind::Dummy => Box::new(Dummy::new(workload, statistics, cfg.workers, cfg.table_partitions, cfg.evm_type)),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let cfg = BenchArgs::parse().into_config()?;
    info!(protocol = ?cfg.protocol, workload = ?cfg.workload, key_space = cfg.key_space, workers = cfg.workers, "bench starting");

    let workload = build_workload(&cfg)?;
    let statistics = Arc::new(Statistics::new(cfg.workers.max(1)));
    let protocol = build_protocol(&cfg, workload, statistics.clone());

    protocol.start();
    std::thread::sleep(cfg.run_duration);
    protocol.stop();

    println!("{}", statistics.print_with_duration(cfg.run_duration));
    Ok(())
}
