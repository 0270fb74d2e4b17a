// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! The YCSB-style workload: every transaction samples 11 distinct slot
//! ids from a single Zipfian (or, for a zero exponent, uniform) family,
//! reads the first 5 and blind-writes the next 5. The 11th sampled id
//! is kept only for parity with the contract call's input encoding (it
//! addresses a byte never read back by the storage trace this crate
//! models) and is otherwise unused.

use super::{Transaction, Workload};
use crate::checkpoint::{EvmType, StorageOp};
use crate::random::{sample_unique_n, RandomSource, ThreadLocalRandom, Uniform, Zipf};
use crate::types::{Address20, Slot32, Word32};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct Ycsb {
    evm_type: Mutex<EvmType>,
    rng: ThreadLocalRandom,
    contract: Address20,
}

impl Ycsb {
    /// `num_elements` is the key-space size; `zipf_exponent <= 0.0`
    /// falls back to uniform sampling.
    pub fn new(num_elements: usize, zipf_exponent: f64) -> crate::error::Result<Self> {
        // Validated eagerly so a bad CLI argument fails at startup
        // rather than on the first sampled transaction.
        if zipf_exponent > 0.0 {
            Zipf::new(num_elements, zipf_exponent)?;
        } else {
            Uniform::new(num_elements)?;
        }
        let concurrency = num_cpus::get().max(1);
        let rng = ThreadLocalRandom::new(concurrency, move || -> Box<dyn RandomSource> {
            if zipf_exponent > 0.0 {
                Box::new(Zipf::new(num_elements, zipf_exponent).expect("validated above"))
            } else {
                Box::new(Uniform::new(num_elements).expect("validated above"))
            }
        });
        Ok(Self {
            evm_type: Mutex::new(EvmType::Strawman),
            rng,
            contract: Address20::from_u8(1),
        })
    }
}

impl Workload for Ycsb {
    fn next(&self) -> Transaction {
        let mut ids = [0usize; 11];
        sample_unique_n(&self.rng, &mut ids);

        let mut program = Vec::with_capacity(10);
        let mut predicted_get_storage = std::collections::HashSet::new();
        let mut predicted_set_storage = std::collections::HashSet::new();
        for &id in &ids[0..5] {
            let key = (self.contract, Slot32::from_index(id as u32));
            program.push(StorageOp::Get(key));
            predicted_get_storage.insert(key);
        }
        for &id in &ids[5..10] {
            let key = (self.contract, Slot32::from_index(id as u32));
            program.push(StorageOp::Put(key, Word32::from_u64(id as u64)));
            predicted_set_storage.insert(key);
        }

        Transaction {
            caller: self.contract,
            callee: self.contract,
            evm_type: *self.evm_type.lock(),
            program,
            predicted_get_storage,
            predicted_set_storage,
        }
    }

    fn set_evm_type(&self, ty: EvmType) {
        *self.evm_type.lock() = ty;
    }
}

impl Ycsb {
    pub fn arc(num_elements: usize, zipf_exponent: f64) -> crate::error::Result<Arc<dyn Workload>> {
        Ok(Arc::new(Self::new(num_elements, zipf_exponent)?))
    }
}
