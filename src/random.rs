// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Key-access distribution samplers.
//!
//! `Zipf` is a direct port of the rejection-inversion sampler used by the
//! Apache Commons RNG project. `Uniform` is the uncontested case.
//! `ThreadLocalRandom` erases the contention a single shared sampler
//! would otherwise see under many worker threads by handing each
//! calling thread its own instance, selected by hashing the thread's
//! id.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    thread,
};

/// A source of integers in `[1, N]` (or `[0, N)` for `Uniform`, see below).
pub trait RandomSource: Send + Sync {
    fn next(&self) -> usize;
}

/// Samples uniformly from `[0, num_elements)`.
pub struct Uniform {
    num_elements: usize,
    rng: Mutex<SmallRng>,
}

impl Uniform {
    pub fn new(num_elements: usize) -> Result<Self> {
        if num_elements == 0 {
            return Err(Error::InvalidSampleSpace(num_elements));
        }
        Ok(Self {
            num_elements,
            rng: Mutex::new(SmallRng::from_entropy()),
        })
    }
}

impl RandomSource for Uniform {
    fn next(&self) -> usize {
        let mut rng = self.rng.lock();
        rng.gen_range(0..self.num_elements)
    }
}

/// Samples integers in `[1, N]` with mass proportional to `k^(-s)` via
/// rejection-inversion over the continuous hazard integral `H`. The
/// variable names below (`h`, `h_integral`, `h_integral_inv`, `helper1`,
/// `helper2`, `s`) follow the algorithm's own notation rather than
/// idiomatic Rust naming, because they are the mathematical constants
/// of the method.
pub struct Zipf {
    num_elements: f64,
    exponent: f64,
    h_integral_x1: f64,
    h_integral_num_elements: f64,
    s: f64,
    rng: Mutex<SmallRng>,
}

fn h(x: f64, exponent: f64) -> f64 {
    (-exponent * x.ln()).exp()
}

fn helper1(x: f64) -> f64 {
    if x.abs() > 1e-8 {
        x.ln_1p() / x
    } else {
        1.0 - x * (0.5 - x * (1.0 / 3.0 - 0.25 * x))
    }
}

fn helper2(x: f64) -> f64 {
    if x.abs() > 1e-8 {
        x.exp_m1() / x
    } else {
        1.0 + x * 0.5 * (1.0 + x * 1.0 / 3.0 * (1.0 + 0.25 * x))
    }
}

fn h_integral_inv(x: f64, exponent: f64) -> f64 {
    let mut t = x * (1.0 - exponent);
    if t < -1.0 {
        t = -1.0;
    }
    (helper1(t) * x).exp()
}

fn h_integral(x: f64, exponent: f64) -> f64 {
    let log_x = x.ln();
    helper2((1.0 - exponent) * log_x) * log_x
}

impl Zipf {
    pub fn new(num_elements: usize, exponent: f64) -> Result<Self> {
        if num_elements == 0 {
            return Err(Error::InvalidSampleSpace(num_elements));
        }
        if exponent <= 0.0 {
            return Err(Error::InvalidExponent(exponent));
        }
        let num_elements = num_elements as f64;
        let h_integral_x1 = h_integral(1.5, exponent) - 1.0;
        let h_integral_num_elements = h_integral(num_elements + 0.5, exponent);
        let s = 2.0 - h_integral_inv(h_integral(2.5, exponent) - h(2.0, exponent), exponent);
        Ok(Self {
            num_elements,
            exponent,
            h_integral_x1,
            h_integral_num_elements,
            s,
            rng: Mutex::new(SmallRng::from_entropy()),
        })
    }
}

impl RandomSource for Zipf {
    fn next(&self) -> usize {
        let mut rng = self.rng.lock();
        let hnum = self.h_integral_num_elements;
        loop {
            let u: f64 = hnum + rng.gen::<f64>() * (self.h_integral_x1 - hnum);
            let x = h_integral_inv(u, self.exponent);
            let mut k64 = x.max(1.0);
            k64 = k64.min(self.num_elements);
            let k = (k64 + 0.5).max(1.0) as usize;
            if k64 - x <= self.s
                || u >= h_integral(k64 + 0.5, self.exponent) - h(k64, self.exponent)
            {
                return k;
            }
        }
    }
}

/// Wraps a family of samplers with per-thread instances to avoid
/// contending on a single mutex across many worker threads. The instance
/// for the calling thread is picked by hashing its `ThreadId`.
pub struct ThreadLocalRandom {
    instances: Vec<Box<dyn RandomSource>>,
}

impl ThreadLocalRandom {
    pub fn new(
        duplication: usize,
        make: impl Fn() -> Box<dyn RandomSource>,
    ) -> Self {
        let instances = (0..duplication.max(1)).map(|_| make()).collect();
        Self { instances }
    }
}

impl RandomSource for ThreadLocalRandom {
    fn next(&self) -> usize {
        let mut hasher = DefaultHasher::new();
        thread::current().id().hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.instances.len();
        self.instances[idx].next()
    }
}

/// Draws with replacement from `rng`, rejecting duplicates, until `dst`
/// is filled with distinct values.
pub fn sample_unique_n(rng: &dyn RandomSource, dst: &mut [usize]) {
    let mut seen = std::collections::HashSet::with_capacity(dst.len());
    let mut i = 0;
    while i < dst.len() {
        let v = rng.next();
        if seen.insert(v) {
            dst[i] = v;
            i += 1;
        }
    }
}
