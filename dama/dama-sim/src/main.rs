// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub use anyhow::Error;
use structopt::StructOpt;

pub type Result<T = (), E = Error> = core::result::Result<T, E>;

mod batch;
mod network;
mod run;
mod scenario;
mod stats;

#[derive(Debug, StructOpt)]
enum Args {
    Run(run::Run),
    Batch(batch::Batch),
}

fn main() -> Result {
    let format = tracing_subscriber::fmt::format()
        .with_level(false)
        .with_timer(VirtualTime)
        .with_ansi(false)
        .compact();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .event_format(format)
        .init();

    match Args::from_args() {
        Args::Run(args) => args.run(),
        Args::Batch(args) => args.run(),
    }
}

/// Prefixes log lines with the simulated time of the logging thread
struct VirtualTime;

impl tracing_subscriber::fmt::time::FormatTime for VirtualTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", dama_core::time::testing::now())
    }
}
