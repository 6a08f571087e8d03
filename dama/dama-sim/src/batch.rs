// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{network, scenario::Scenario, stats::Report, Result};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::{
    io::{self, Write},
    path::PathBuf,
};
use structopt::StructOpt;

/// Simulates a scenario with a range of seeds in parallel
#[derive(Debug, StructOpt)]
pub struct Batch {
    #[structopt(long, default_value = "16")]
    seeds: u64,

    #[structopt(long, default_value = "1")]
    first_seed: u64,

    /// Omits the per-seed reports from the output
    #[structopt(long)]
    summary_only: bool,

    scenario: PathBuf,
}

#[derive(Debug, Serialize)]
struct Summary {
    runs: usize,
    mean_delivery_ratio: f64,
    min_delivery_ratio: f64,
    flushed: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    reports: Vec<Report>,
}

impl Summary {
    fn new(reports: Vec<Report>) -> Self {
        let runs = reports.len();
        let ratios = reports.iter().map(Report::delivery_ratio);
        let mean_delivery_ratio = if runs == 0 {
            0.0
        } else {
            ratios.clone().sum::<f64>() / runs as f64
        };
        let min_delivery_ratio = ratios.fold(f64::NAN, f64::min);
        let flushed = reports.iter().map(|report| report.arq.flushed).sum();

        Self {
            runs,
            mean_delivery_ratio,
            min_delivery_ratio,
            flushed,
            reports,
        }
    }
}

impl Batch {
    pub fn run(&self) -> Result {
        let scenario = Scenario::load(&self.scenario)?;

        let progress = ProgressBar::new(self.seeds);
        progress.set_style(
            ProgressStyle::default_bar().template("{elapsed_precise} {wide_bar} {pos}/{len} ({eta})"),
        );

        let seeds = self.first_seed..self.first_seed.saturating_add(self.seeds);
        let reports = seeds
            .into_par_iter()
            .progress_with(progress.clone())
            .map(|seed| network::simulate(&scenario, seed))
            .collect::<Result<Vec<_>>>()?;
        progress.finish_and_clear();

        let mut summary = Summary::new(reports);
        if self.summary_only {
            summary.reports.clear();
        }

        let stdout = io::stdout();
        let mut out = stdout.lock();
        serde_json::to_writer_pretty(&mut out, &summary)?;
        writeln!(out)?;

        Ok(())
    }
}
