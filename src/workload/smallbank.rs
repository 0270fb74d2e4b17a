// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! The Smallbank workload: each account holds a checking and a savings
//! balance, and every transaction is one of the six canonical Smallbank
//! operations over one or two accounts sampled from the configured
//! distribution.

use super::{Transaction, Workload};
use crate::checkpoint::{EvmType, StorageOp};
use crate::random::{RandomSource, ThreadLocalRandom, Uniform, Zipf};
use crate::types::{Address20, Slot32, Word32};
use parking_lot::Mutex;
use std::sync::Arc;

/// Even slots hold a checking balance, odd slots the matching savings
/// balance, so one account occupies a pair of adjacent slots.
fn checking_slot(account: usize) -> Slot32 {
    Slot32::from_index((account as u32) * 2)
}
fn savings_slot(account: usize) -> Slot32 {
    Slot32::from_index((account as u32) * 2 + 1)
}

pub struct Smallbank {
    evm_type: Mutex<EvmType>,
    rng: ThreadLocalRandom,
    kind_rng: ThreadLocalRandom,
    contract: Address20,
}

impl Smallbank {
    pub fn new(num_elements: usize, zipf_exponent: f64) -> crate::error::Result<Self> {
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
        let kind_rng = ThreadLocalRandom::new(concurrency, || -> Box<dyn RandomSource> {
            Box::new(Uniform::new(6).expect("6 is nonzero"))
        });
        Ok(Self {
            evm_type: Mutex::new(EvmType::Strawman),
            rng,
            kind_rng,
            contract: Address20::from_u8(2),
        })
    }

    fn sample_account(&self) -> usize {
        self.rng.next()
    }
}

impl Workload for Smallbank {
    fn next(&self) -> Transaction {
        let mut program = Vec::new();
        let mut predicted_get_storage = std::collections::HashSet::new();
        let mut predicted_set_storage = std::collections::HashSet::new();
        let mut read = |program: &mut Vec<StorageOp>, slot| {
            let key = (self.contract, slot);
            program.push(StorageOp::Get(key));
            predicted_get_storage.insert(key);
        };
        let mut write = |program: &mut Vec<StorageOp>, slot, value| {
            let key = (self.contract, slot);
            program.push(StorageOp::Put(key, value));
            predicted_set_storage.insert(key);
        };

        match self.kind_rng.next() % 6 {
            // Amalgamate: zero acc0, credit the sum to acc1's checking.
            0 => {
                let (a0, a1) = (self.sample_account(), self.sample_account());
                read(&mut program, checking_slot(a0));
                read(&mut program, savings_slot(a0));
                read(&mut program, checking_slot(a1));
                write(&mut program, checking_slot(a0), Word32::from_u64(0));
                write(&mut program, savings_slot(a0), Word32::from_u64(0));
                write(&mut program, checking_slot(a1), Word32::from_u64(1));
            },
            // Balance: read-only, both balances of one account.
            1 => {
                let a = self.sample_account();
                read(&mut program, checking_slot(a));
                read(&mut program, savings_slot(a));
            },
            // DepositChecking: read then write one account's checking.
            2 => {
                let a = self.sample_account();
                read(&mut program, checking_slot(a));
                write(&mut program, checking_slot(a), Word32::from_u64(1));
            },
            // SendPayment: debit acc0's checking, credit acc1's checking.
            3 => {
                let (a0, a1) = (self.sample_account(), self.sample_account());
                read(&mut program, checking_slot(a0));
                read(&mut program, checking_slot(a1));
                write(&mut program, checking_slot(a0), Word32::from_u64(0));
                write(&mut program, checking_slot(a1), Word32::from_u64(1));
            },
            // TransactSavings: read then write one account's savings.
            4 => {
                let a = self.sample_account();
                read(&mut program, savings_slot(a));
                write(&mut program, savings_slot(a), Word32::from_u64(1));
            },
            // WriteCheck: read both balances, debit checking regardless
            // of sufficiency (the real contract would charge a penalty
            // fee on overdraft; this crate does not model balances).
            _ => {
                let a = self.sample_account();
                read(&mut program, checking_slot(a));
                read(&mut program, savings_slot(a));
                write(&mut program, checking_slot(a), Word32::from_u64(0));
            },
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

impl Smallbank {
    pub fn arc(num_elements: usize, zipf_exponent: f64) -> crate::error::Result<Arc<dyn Workload>> {
        Ok(Arc::new(Self::new(num_elements, zipf_exponent)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn next_always_produces_a_nonempty_balanced_program() {
        let w = Smallbank::new(1000, 1.0).unwrap();
        for _ in 0..200 {
            let tx = w.next();
            assert!(!tx.program.is_empty());
            assert!(tx.program.iter().any(|op| matches!(op, StorageOp::Get(_))));
        }
    }

    #[test]
    fn checking_and_savings_slots_are_distinct_for_an_account() {
        assert_ne!(checking_slot(5), savings_slot(5));
    }

    #[test]
    fn set_evm_type_affects_subsequently_produced_transactions() {
        let w = Smallbank::new(1000, 1.0).unwrap();
        w.set_evm_type(EvmType::Basic);
        let tx = w.next();
        assert_eq!(tx.evm_type, EvmType::Basic);
    }

    #[test]
    fn rejects_bad_key_space() {
        assert!(Smallbank::new(0, 1.0).is_err());
    }
}
