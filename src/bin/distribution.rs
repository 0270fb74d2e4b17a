// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! `distribution <num_elements> <exponent> <N>`: prints `N` Zipfian
//! samples, one per line, to standard output. Non-positive
//! `num_elements` or `N` exits with code 1 and a usage message.

use clap::Parser;
use occ_sched::random::{RandomSource, Zipf};
use std::io::Write;

#[derive(Parser)]
#[command(name = "distribution", about = "Print N Zipfian samples over [1, num_elements]")]
struct Args {
    num_elements: i64,
    exponent: f64,
    n: i64,
}

fn main() {
    tracing_subscriber::fmt::try_init().ok();
    let args = Args::parse();

    if args.num_elements <= 0 || args.n <= 0 {
        eprintln!("usage: distribution <num_elements> <exponent> <N>, with num_elements > 0 and N > 0");
        std::process::exit(1);
    }

    let zipf = match Zipf::new(args.num_elements as usize, args.exponent) {
        Ok(z) => z,
        Err(e) => {
            eprintln!("usage: distribution <num_elements> <exponent> <N>: {e}");
            std::process::exit(1);
        },
    };

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    for _ in 0..args.n {
        let _ = writeln!(out, "{}", zipf.next());
    }
}
