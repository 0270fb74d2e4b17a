// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! The workload contract every synthetic generator implements.
//!
//! A [`Transaction`] is the reduced, bytecode-free shape this crate
//! cares about: a caller/callee address pair plus the storage-op
//! program a real interpreter would have driven (see
//! [`crate::checkpoint`]), and the predicted read/write key sets a
//! deterministic protocol (Calvin, Aria-FB) needs before execution.

pub mod smallbank;
pub mod ycsb;

use crate::checkpoint::{EvmType, Program};
use crate::types::{Address20, Key};
use std::collections::HashSet;

#[derive(Clone)]
pub struct Transaction {
    pub caller: Address20,
    pub callee: Address20,
    pub evm_type: EvmType,
    pub program: Program,
    pub predicted_get_storage: HashSet<Key>,
    pub predicted_set_storage: HashSet<Key>,
}

/// A source of synthetic transactions, shared across every worker
/// thread that calls [`Workload::next`] concurrently. `set_evm_type`
/// takes `&self` (not `&mut self`) for exactly that reason — a
/// benchmark driver flips the checkpoint cost model for the *next*
/// transaction produced from any thread without taking the workload
/// out of service.
pub trait Workload: Send + Sync {
    fn next(&self) -> Transaction;
    fn set_evm_type(&self, ty: EvmType);
}
