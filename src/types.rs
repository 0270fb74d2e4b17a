// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! The data model shared by every protocol: a 20-byte contract address, a
//! 32-byte storage slot, and a 256-bit scalar value. Mirrors the
//! `evmc::address` / `evmc::bytes32` pair storage is keyed by, without
//! depending on an actual EVM ABI crate since the bytecode engine itself
//! is out of scope.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A transaction id: globally unique, monotonically assigned in birth
/// order. Lower id = older = higher commit priority.
pub type TxId = u64;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Address20(pub [u8; 20]);

impl Address20 {
    pub const fn from_u8(byte: u8) -> Self {
        Self([byte; 20])
    }
}

impl fmt::Debug for Address20 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex_string(&self.0))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Slot32(pub [u8; 32]);

impl Slot32 {
    pub fn from_index(index: u32) -> Self {
        let mut bytes = [0u8; 32];
        bytes[28..32].copy_from_slice(&index.to_be_bytes());
        Self(bytes)
    }

    pub fn index(&self) -> u32 {
        u32::from_be_bytes([self.0[28], self.0[29], self.0[30], self.0[31]])
    }
}

impl fmt::Debug for Slot32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex_string(&self.0))
    }
}

/// `(address, slot)`, the key every table is indexed by.
pub type Key = (Address20, Slot32);

/// A 256-bit scalar word, the value type every table stores.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Word32(pub [u8; 32]);

impl Word32 {
    pub fn from_u64(v: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..32].copy_from_slice(&v.to_be_bytes());
        Self(bytes)
    }

    pub fn as_u64(&self) -> u64 {
        u64::from_be_bytes(self.0[24..32].try_into().unwrap())
    }
}

impl fmt::Debug for Word32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex_string(&self.0))
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
