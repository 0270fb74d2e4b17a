// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! The benchmark's configuration surface. CLI parsing itself stays thin
//! (argument *validation* still surfaces a constructed
//! [`crate::error::Error`]), but the parsed shape is a plain struct so
//! [`crate::protocol`] and [`crate::workload`] never depend on `clap`
//! directly.

use crate::checkpoint::EvmType;
use crate::error::{Error, Result};
use clap::{Parser, ValueEnum};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProtocolKind {
    Serial,
    Sparkle,
    Spectrum,
    Aria,
    Calvin,
    Dummy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum WorkloadKind {
    Ycsb,
    Smallbank,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum EvmTypeArg {
    Basic,
    Strawman,
    Copyonwrite,
}

impl From<EvmTypeArg> for EvmType {
    fn from(value: EvmTypeArg) -> Self {
        match value {
            EvmTypeArg::Basic => EvmType::Basic,
            EvmTypeArg::Strawman => EvmType::Strawman,
            EvmTypeArg::Copyonwrite => EvmType::CopyOnWrite,
        }
    }
}

/// Parsed benchmark parameters, independent of how they were obtained
/// (CLI, a config file, a test harness).
#[derive(Clone, Debug)]
pub struct BenchConfig {
    pub protocol: ProtocolKind,
    pub workload: WorkloadKind,
    pub key_space: usize,
    pub zipf_exponent: f64,
    pub evm_type: EvmType,
    pub workers: usize,
    /// Calvin-only: number of dispatcher threads.
    pub dispatchers: usize,
    pub table_partitions: usize,
    /// Aria-FB-only: transactions per batch.
    pub batch_size: usize,
    /// Aria-FB-only: allow write-only conflicts to commit by reordering.
    pub reordering: bool,
    pub run_duration: Duration,
}

/// `clap`-derived CLI args for the `bench` binary; validated into a
/// [`BenchConfig`] by [`Self::into_config`].
#[derive(Parser, Debug)]
#[command(name = "bench", about = "Benchmark an OCC protocol against a synthetic workload")]
pub struct BenchArgs {
    #[arg(long, value_enum)]
    pub protocol: ProtocolKind,

    #[arg(long, value_enum, default_value = "ycsb")]
    pub workload: WorkloadKind,

    #[arg(long, default_value_t = 100_000)]
    pub key_space: usize,

    #[arg(long, default_value_t = 0.0)]
    pub zipf_exponent: f64,

    #[arg(long, value_enum, default_value = "strawman")]
    pub evm_type: EvmTypeArg,

    #[arg(long, default_value_t = num_cpus::get())]
    pub workers: usize,

    #[arg(long, default_value_t = 2)]
    pub dispatchers: usize,

    #[arg(long, default_value_t = 64)]
    pub table_partitions: usize,

    #[arg(long, default_value_t = 100)]
    pub batch_size: usize,

    #[arg(long, default_value_t = false)]
    pub reordering: bool,

    #[arg(long, default_value_t = 5)]
    pub run_seconds: u64,
}

impl BenchArgs {
    pub fn into_config(self) -> Result<BenchConfig> {
        if self.key_space == 0 {
            return Err(Error::InvalidSampleSpace(self.key_space));
        }
        if self.zipf_exponent < 0.0 {
            return Err(Error::InvalidExponent(self.zipf_exponent));
        }
        if self.workers == 0 {
            return Err(Error::InvalidCliArgument("workers must be at least 1".to_string()));
        }
        Ok(BenchConfig {
            protocol: self.protocol,
            workload: self.workload,
            key_space: self.key_space,
            zipf_exponent: self.zipf_exponent,
            evm_type: self.evm_type.into(),
            workers: self.workers,
            dispatchers: self.dispatchers.max(1),
            table_partitions: self.table_partitions.max(1),
            batch_size: self.batch_size.max(1),
            reordering: self.reordering,
            run_duration: Duration::from_secs(self.run_seconds.max(1)),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_zero_key_space() {
        let args = BenchArgs {
            protocol: ProtocolKind::Serial,
            workload: WorkloadKind::Ycsb,
            key_space: 0,
            zipf_exponent: 0.0,
            evm_type: EvmTypeArg::Strawman,
            workers: 4,
            dispatchers: 2,
            table_partitions: 8,
            batch_size: 10,
            reordering: false,
            run_seconds: 1,
        };
        assert!(args.into_config().is_err());
    }

    #[test]
    fn rejects_negative_exponent() {
        let args = BenchArgs {
            protocol: ProtocolKind::Serial,
            workload: WorkloadKind::Ycsb,
            key_space: 100,
            zipf_exponent: -1.0,
            evm_type: EvmTypeArg::Strawman,
            workers: 4,
            dispatchers: 2,
            table_partitions: 8,
            batch_size: 10,
            reordering: false,
            run_seconds: 1,
        };
        assert!(args.into_config().is_err());
    }

    #[test]
    fn accepts_sane_defaults() {
        let args = BenchArgs {
            protocol: ProtocolKind::Sparkle,
            workload: WorkloadKind::Ycsb,
            key_space: 1000,
            zipf_exponent: 0.99,
            evm_type: EvmTypeArg::Copyonwrite,
            workers: 4,
            dispatchers: 2,
            table_partitions: 8,
            batch_size: 10,
            reordering: true,
            run_seconds: 1,
        };
        let cfg = args.into_config().unwrap();
        assert_eq!(cfg.key_space, 1000);
        assert!(cfg.reordering);
    }
}
