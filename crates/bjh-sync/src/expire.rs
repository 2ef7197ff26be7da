//! Retention window over `lastSeen`, falling back to `posted`.

use bjh_core::Job;
use chrono::NaiveDate;

/// A job with no reference date never expires. Ages are whole days, so a job
/// last seen exactly `max_age_days` ago is still kept.
pub fn is_within_window(job: &Job, max_age_days: i64, today: NaiveDate) -> bool {
    match job.reference_date() {
        Some(date) => (today - date).num_days() <= max_age_days,
        None => true,
    }
}

pub fn expire(jobs: Vec<Job>, max_age_days: i64, today: NaiveDate) -> Vec<Job> {
    jobs.into_iter()
        .filter(|job| is_within_window(job, max_age_days, today))
        .collect()
}
