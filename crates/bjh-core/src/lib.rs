//! Core domain model for the Biomedical Job Hub ingestion pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "bjh-core";

/// Key names of the persisted state. Values are JSON documents.
pub mod keys {
    pub const LIVE_JOBS: &str = "jobs:live";
    pub const FINGERPRINTS: &str = "jobs:fingerprints";
    pub const LAST_FETCH: &str = "jobs:last-fetch";
    pub const CRON_LOG: &str = "jobs:cron-log";
}

/// Fallback search-engine URLs for a posting, keyed by provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchLinks {
    pub indeed: String,
    pub google: String,
    pub linkedin: String,
}

fn unknown_company() -> String {
    "Unknown".to_string()
}

fn salary_not_listed() -> String {
    "Salary not listed".to_string()
}

/// Canonical job record shared by every source.
///
/// The serialized form uses camelCase keys because the persisted `jobs:live`
/// document is read directly by the display layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub title: String,
    #[serde(default = "unknown_company")]
    pub company: String,
    #[serde(default)]
    pub lab: Option<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub job_type: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub employer_type: String,
    #[serde(default = "salary_not_listed")]
    pub salary: String,
    #[serde(default)]
    pub salary_min: Option<u64>,
    #[serde(default)]
    pub salary_max: Option<u64>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default, deserialize_with = "loose_date")]
    pub posted: Option<NaiveDate>,
    #[serde(
        default,
        deserialize_with = "loose_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_seen: Option<NaiveDate>,
    #[serde(default)]
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_links: Option<SearchLinks>,
    #[serde(default)]
    pub source: String,
}

/// Parses the date shapes sources publish: RFC 3339, RFC 2822, or anything
/// that starts with `YYYY-MM-DD` (USAJOBS sends `2026-10-05T00:00:00.0000`).
pub fn parse_loose_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.date_naive());
    }
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

/// Stored records may carry raw source timestamps; an unreadable date decodes
/// as undated rather than failing the whole document.
fn loose_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_loose_date))
}

impl Job {
    /// Date used for retention decisions: `lastSeen`, else `posted`.
    pub fn reference_date(&self) -> Option<NaiveDate> {
        self.last_seen.or(self.posted)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.title, &self.company, &self.location)
    }
}

/// Identity key of a posting, derived from title, company and location.
///
/// The hash is djb2 over the UTF-16 code units of
/// `lower(trim(title))|lower(trim(company))|lower(trim(location))`, kept in
/// signed 32-bit arithmetic and rendered in base 36. Fingerprints written by
/// earlier deployments of the hub use the same encoding, so stored sets stay
/// comparable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(title: &str, company: &str, location: &str) -> Self {
        let raw = format!(
            "{}|{}|{}",
            title.trim().to_lowercase(),
            company.trim().to_lowercase(),
            location.trim().to_lowercase()
        );
        let mut hash: i32 = 5381;
        for unit in raw.encode_utf16() {
            hash = hash
                .wrapping_shl(5)
                .wrapping_add(hash)
                .wrapping_add(i32::from(unit));
        }
        Self(to_base36(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn to_base36(value: i32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut n = i64::from(value).unsigned_abs();
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    if value < 0 {
        out.push(b'-');
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Pipeline stages, in the order a run walks through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Idle,
    Fetching,
    Merging,
    Filtering,
    Expiring,
    Persisting,
    Succeeded,
    Failed,
}

impl RunStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStage::Succeeded | RunStage::Failed)
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Idle => "idle",
            RunStage::Fetching => "fetching",
            RunStage::Merging => "merging",
            RunStage::Filtering => "filtering",
            RunStage::Expiring => "expiring",
            RunStage::Persisting => "persisting",
            RunStage::Succeeded => "succeeded",
            RunStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-run record persisted under `jobs:cron-log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub stage: RunStage,
    /// Stage that was active when the run failed.
    #[serde(default)]
    pub failed_at: Option<RunStage>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub sources: BTreeMap<String, usize>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub carried_forward: usize,
    #[serde(default)]
    pub total_fetched: usize,
    #[serde(default)]
    pub total_after_dedup: usize,
    #[serde(default)]
    pub new_postings: usize,
    #[serde(default)]
    pub total_merged: usize,
    #[serde(default)]
    pub removed_by_relevance: usize,
    #[serde(default)]
    pub removed_by_expiration: usize,
    #[serde(default)]
    pub total_active: usize,
    #[serde(default)]
    pub duration_ms: u64,
}

impl RunReport {
    pub fn start(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: None,
            stage: RunStage::Idle,
            failed_at: None,
            error: None,
            sources: BTreeMap::new(),
            errors: Vec::new(),
            carried_forward: 0,
            total_fetched: 0,
            total_after_dedup: 0,
            new_postings: 0,
            total_merged: 0,
            removed_by_relevance: 0,
            removed_by_expiration: 0,
            total_active: 0,
            duration_ms: 0,
        }
    }

    pub fn advance(&mut self, stage: RunStage) {
        self.stage = stage;
    }

    pub fn record_source(&mut self, source_id: &str, count: usize) {
        *self.sources.entry(source_id.to_string()).or_default() += count;
    }

    pub fn succeed(&mut self, finished_at: DateTime<Utc>) {
        self.stage = RunStage::Succeeded;
        self.close(finished_at);
    }

    pub fn fail(&mut self, message: impl Into<String>, finished_at: DateTime<Utc>) {
        let message = message.into();
        if !self.stage.is_terminal() {
            self.failed_at = Some(self.stage);
        }
        self.stage = RunStage::Failed;
        self.errors.push(message.clone());
        self.error = Some(message);
        self.close(finished_at);
    }

    pub fn succeeded(&self) -> bool {
        self.stage == RunStage::Succeeded
    }

    fn close(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = Some(finished_at);
        self.duration_ms = (finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
    }
}
