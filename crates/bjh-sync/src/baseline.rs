//! Curated baseline postings shipped with the hub.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use bjh_core::Job;
use chrono::NaiveDate;

const BUILTIN_BASELINE_JSON: &str = include_str!("../../../data/jobs.json");

pub fn builtin_baseline() -> Result<Vec<Job>> {
    serde_json::from_str(BUILTIN_BASELINE_JSON).context("parsing built-in data/jobs.json")
}

/// Reads the baseline at `path`, or the built-in copy when the file is absent.
pub fn load_baseline(path: impl AsRef<Path>) -> Result<Vec<Job>> {
    let path = path.as_ref();
    if !path.exists() {
        return builtin_baseline();
    }
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Marks every job as observed on `today`.
pub fn stamp_last_seen(jobs: Vec<Job>, today: NaiveDate) -> Vec<Job> {
    jobs.into_iter()
        .map(|mut job| {
            job.last_seen = Some(today);
            job
        })
        .collect()
}
