// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{network, scenario::Scenario, Result};
use std::{
    io::{self, Write},
    path::PathBuf,
};
use structopt::StructOpt;

/// Simulates a scenario once and prints its report
#[derive(Debug, StructOpt)]
pub struct Run {
    #[structopt(long, default_value = "1")]
    seed: u64,

    /// Prints the report on a single line
    #[structopt(long)]
    compact: bool,

    scenario: PathBuf,
}

impl Run {
    pub fn run(&self) -> Result {
        let scenario = Scenario::load(&self.scenario)?;
        let report = network::simulate(&scenario, self.seed)?;

        let stdout = io::stdout();
        let mut out = stdout.lock();
        if self.compact {
            serde_json::to_writer(&mut out, &report)?;
        } else {
            serde_json::to_writer_pretty(&mut out, &report)?;
        }
        writeln!(out)?;

        Ok(())
    }
}
