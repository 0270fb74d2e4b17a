// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Crate-wide error type.
//!
//! Per the constructor-validation rule: every other failure mode (a
//! concurrency invalidation, a batch reject, a prediction miss) is
//! recovered locally inside the protocol that detected it and never
//! surfaces as an `Error`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("sample space must contain at least one element, got {0}")]
    InvalidSampleSpace(usize),

    #[error("zipfian exponent must be positive, got {0}")]
    InvalidExponent(f64),

    #[error("invalid argument: {0}")]
    InvalidCliArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;
