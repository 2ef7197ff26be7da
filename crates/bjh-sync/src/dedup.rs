//! Fingerprint deduplication with first-occurrence-wins precedence.

use std::collections::BTreeSet;

use bjh_core::{Fingerprint, Job};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Deduped {
    pub jobs: Vec<Job>,
    /// Every fingerprint seen, seed included.
    pub fingerprints: BTreeSet<Fingerprint>,
}

/// Keeps the first job for each fingerprint, in input order. Jobs whose
/// fingerprint is already in `seed` are dropped. To let one batch win over
/// another on conflict, pass it first.
pub fn dedupe(jobs: impl IntoIterator<Item = Job>, seed: &BTreeSet<Fingerprint>) -> Deduped {
    let mut seen = seed.clone();
    let mut unique = Vec::new();
    for job in jobs {
        if seen.insert(job.fingerprint()) {
            unique.push(job);
        }
    }
    Deduped {
        jobs: unique,
        fingerprints: seen,
    }
}

/// Concatenates batches in precedence order and dedupes the result.
pub fn merge_in_order(batches: impl IntoIterator<Item = Vec<Job>>) -> Deduped {
    dedupe(batches.into_iter().flatten(), &BTreeSet::new())
}
