// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Benchmark counters: one cache-line-padded set per shard so worker
//! threads never contend on the same cache line while journaling.

use crossbeam::utils::CachePadded;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

#[derive(Default)]
struct Counters {
    count_commit: AtomicU64,
    count_execution: AtomicU64,
    count_operations: AtomicU64,
    count_latency_25us: AtomicU64,
    count_latency_50us: AtomicU64,
    count_latency_100us: AtomicU64,
    count_latency_100us_above: AtomicU64,
}

/// A sharded commit/execution/latency counter set, one [`CachePadded`]
/// [`Counters`] per shard so concurrent workers journaling on different
/// shards never false-share a cache line. The shard for a call is
/// picked by hashing the calling thread's id, mirroring
/// `random::ThreadLocalRandom`'s approach to avoiding contention.
pub struct Statistics {
    shards: Vec<CachePadded<Counters>>,
}

impl Statistics {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| CachePadded::new(Counters::default())).collect(),
        }
    }

    fn shard(&self) -> &Counters {
        use std::{
            collections::hash_map::DefaultHasher,
            hash::{Hash, Hasher},
            thread,
        };
        let mut hasher = DefaultHasher::new();
        thread::current().id().hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Journals one committed transaction with its end-to-end latency,
    /// bucketing it the way `Statistics::JournalCommit` does.
    pub fn journal_commit(&self, latency: Duration) {
        let c = self.shard();
        c.count_commit.fetch_add(1, Ordering::Relaxed);
        let micros = latency.as_micros();
        if micros <= 25 {
            c.count_latency_25us.fetch_add(1, Ordering::Relaxed);
        } else if micros <= 50 {
            c.count_latency_50us.fetch_add(1, Ordering::Relaxed);
        } else if micros <= 100 {
            c.count_latency_100us.fetch_add(1, Ordering::Relaxed);
        } else {
            c.count_latency_100us_above.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn journal_execute(&self) {
        self.shard().count_execution.fetch_add(1, Ordering::Relaxed);
    }

    pub fn journal_operations(&self, count: usize) {
        self.shard().count_operations.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn totals(&self) -> Counters {
        let mut totals = Counters::default();
        for shard in &self.shards {
            totals.count_commit.fetch_add(shard.count_commit.load(Ordering::Relaxed), Ordering::Relaxed);
            totals.count_execution.fetch_add(shard.count_execution.load(Ordering::Relaxed), Ordering::Relaxed);
            totals.count_operations.fetch_add(shard.count_operations.load(Ordering::Relaxed), Ordering::Relaxed);
            totals.count_latency_25us.fetch_add(shard.count_latency_25us.load(Ordering::Relaxed), Ordering::Relaxed);
            totals.count_latency_50us.fetch_add(shard.count_latency_50us.load(Ordering::Relaxed), Ordering::Relaxed);
            totals.count_latency_100us.fetch_add(shard.count_latency_100us.load(Ordering::Relaxed), Ordering::Relaxed);
            totals
                .count_latency_100us_above
                .fetch_add(shard.count_latency_100us_above.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        totals
    }

    /// A human-readable report of totals and per-second throughputs
    /// over `elapsed`, mirroring `Statistics::Print` plus derived
    /// per-second commit/execution/operation rates.
    pub fn print_with_duration(&self, elapsed: Duration) -> String {
        let t = self.totals();
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        format!(
            "#commit        {}\n\
             #execution     {}\n\
             #operations    {}\n\
             #25us          {}\n\
             #50us          {}\n\
             #100us         {}\n\
             #>100us        {}\n\
             commits/s      {:.1}\n\
             executions/s   {:.1}\n",
            t.count_commit.load(Ordering::Relaxed),
            t.count_execution.load(Ordering::Relaxed),
            t.count_operations.load(Ordering::Relaxed),
            t.count_latency_25us.load(Ordering::Relaxed),
            t.count_latency_50us.load(Ordering::Relaxed),
            t.count_latency_100us.load(Ordering::Relaxed),
            t.count_latency_100us_above.load(Ordering::Relaxed),
            t.count_commit.load(Ordering::Relaxed) as f64 / secs,
            t.count_execution.load(Ordering::Relaxed) as f64 / secs,
        )
    }

    pub fn commit_count(&self) -> u64 {
        self.totals().count_commit.load(Ordering::Relaxed)
    }
}
