//! Sync pipeline orchestration: fetch, merge, filter, expire, persist.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use bjh_adapters::{
    fetchers_from_registry, ClassificationRules, FetchContext, SourceBatch, SourceCredentials,
    SourceFetcher, SourceRegistry,
};
use bjh_core::{keys, Fingerprint, Job, RunReport, RunStage};
use bjh_storage::{get_json, set_json, FileStore, HttpClientConfig, HttpFetcher, KeyValueStore};
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use thiserror::Error;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub mod baseline;
pub mod dedup;
pub mod expire;
pub mod links;
pub mod relevance;

pub use baseline::{builtin_baseline, load_baseline, stamp_last_seen};
pub use dedup::{dedupe, merge_in_order, Deduped};
pub use expire::expire;
pub use links::backfill_links;
pub use relevance::{Rejection, RelevanceRules};

pub const CRATE_NAME: &str = "bjh-sync";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub workspace_root: PathBuf,
    pub store_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub per_source_concurrency: usize,
    /// Wall-clock budget for everything before persisting.
    pub run_budget_secs: u64,
    pub max_age_days: i64,
    /// Defaults to `data/jobs.json` under the workspace root.
    pub baseline_path: Option<PathBuf>,
    pub credentials: SourceCredentials,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            store_dir: PathBuf::from("./store"),
            user_agent: "bjh-bot/0.1".to_string(),
            http_timeout_secs: 8,
            per_source_concurrency: 4,
            run_budget_secs: 45,
            max_age_days: 30,
            baseline_path: None,
            credentials: SourceCredentials::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workspace_root: std::env::var("BJH_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            store_dir: std::env::var("BJH_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_dir),
            user_agent: std::env::var("BJH_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_parse("BJH_HTTP_TIMEOUT_SECS").unwrap_or(defaults.http_timeout_secs),
            per_source_concurrency: env_parse("BJH_PER_SOURCE_CONCURRENCY")
                .unwrap_or(defaults.per_source_concurrency),
            run_budget_secs: env_parse("BJH_RUN_BUDGET_SECS").unwrap_or(defaults.run_budget_secs),
            max_age_days: env_parse("BJH_MAX_AGE_DAYS").unwrap_or(defaults.max_age_days),
            baseline_path: std::env::var("BJH_BASELINE_PATH").ok().map(PathBuf::from),
            credentials: SourceCredentials::from_env(),
        }
    }

    pub fn baseline_path(&self) -> PathBuf {
        self.baseline_path
            .clone()
            .unwrap_or_else(|| self.workspace_root.join("data/jobs.json"))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync run is already in progress")]
    AlreadyRunning,
    #[error("sync run failed: {message}")]
    Failed {
        report: Box<RunReport>,
        message: String,
    },
}

pub struct SyncPipeline {
    config: SyncConfig,
    store: Arc<dyn KeyValueStore>,
    http: Arc<HttpFetcher>,
    rules: Arc<ClassificationRules>,
    relevance: RelevanceRules,
    fetchers: Vec<Arc<dyn SourceFetcher>>,
    baseline: Vec<Job>,
    run_lock: Mutex<()>,
}

impl SyncPipeline {
    /// Loads the source registry, rule tables and curated baseline from the
    /// workspace root.
    pub fn new(config: SyncConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let root = config.workspace_root.clone();
        let registry = SourceRegistry::load(&root)?;
        let fetchers = fetchers_from_registry(&registry, &config.credentials);
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            per_source_concurrency: config.per_source_concurrency.max(1),
            ..Default::default()
        })?;
        Ok(Self {
            rules: Arc::new(ClassificationRules::load(&root)?),
            relevance: RelevanceRules::load(&root)?,
            baseline: load_baseline(config.baseline_path())?,
            http: Arc::new(http),
            fetchers,
            store,
            config,
            run_lock: Mutex::new(()),
        })
    }

    pub fn with_fetchers(mut self, fetchers: Vec<Arc<dyn SourceFetcher>>) -> Self {
        self.fetchers = fetchers;
        self
    }

    pub fn with_baseline(mut self, baseline: Vec<Job>) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn with_relevance(mut self, relevance: RelevanceRules) -> Self {
        self.relevance = relevance;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn baseline(&self) -> &[Job] {
        &self.baseline
    }

    pub async fn run_once(&self) -> Result<RunReport, SyncError> {
        self.run_at(Utc::now()).await
    }

    /// Runs the pipeline as of `now`. Only one run per pipeline may be in
    /// flight; a concurrent call gets [`SyncError::AlreadyRunning`].
    ///
    /// `jobs:live` is written only after every earlier stage has finished, so
    /// a failed run leaves the previous snapshot in place. The RunReport is
    /// written for failed runs as well.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunReport, SyncError> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("sync trigger rejected; a run is already in progress");
            return Err(SyncError::AlreadyRunning);
        };

        let run_id = Uuid::new_v4();
        let clock = Instant::now();
        let today = now.date_naive();
        let mut report = RunReport::start(run_id, now);
        info!(%run_id, sources = self.fetchers.len(), "sync run started");

        let budget = Duration::from_secs(self.config.run_budget_secs);
        let staged = match tokio::time::timeout(budget, self.stage(&mut report, run_id, today)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "run exceeded its {}s budget",
                self.config.run_budget_secs
            )),
        };

        let outcome = match staged {
            Ok(active) => self.persist(&mut report, &active, now, clock).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                info!(
                    %run_id,
                    fetched = report.total_fetched,
                    new = report.new_postings,
                    active = report.total_active,
                    removed_by_relevance = report.removed_by_relevance,
                    removed_by_expiration = report.removed_by_expiration,
                    errors = report.errors.len(),
                    duration_ms = report.duration_ms,
                    "sync run succeeded"
                );
                Ok(report)
            }
            Err(err) => {
                let message = format!("{err:#}");
                report.fail(message.clone(), finish_time(now, clock));
                error!(%run_id, stage = ?report.failed_at, error = %message, "sync run failed");
                if let Err(log_err) = set_json(self.store.as_ref(), keys::CRON_LOG, &report).await {
                    warn!(%run_id, error = %log_err, "could not record failed run");
                }
                Err(SyncError::Failed {
                    report: Box::new(report),
                    message,
                })
            }
        }
    }

    /// Everything up to, but not including, persistence.
    async fn stage(&self, report: &mut RunReport, run_id: Uuid, today: NaiveDate) -> Result<Vec<Job>> {
        report.advance(RunStage::Fetching);
        let carried = self.load_carried(report).await?;
        let known: BTreeSet<Fingerprint> = get_json(self.store.as_ref(), keys::FINGERPRINTS)
            .await
            .context("loading stored fingerprints")?
            .unwrap_or_default();
        report.carried_forward = carried.len();

        let ctx = FetchContext {
            run_id,
            today,
            http: Arc::clone(&self.http),
            rules: Arc::clone(&self.rules),
        };
        let mut fresh = Vec::new();
        for batch in self.fetch_all(ctx).await {
            report.record_source(&batch.source_id, batch.jobs.len());
            report.errors.extend(batch.errors);
            fresh.extend(batch.jobs);
        }
        report.total_fetched = fresh.len();

        report.advance(RunStage::Merging);
        let fresh = stamp_last_seen(dedupe(fresh, &BTreeSet::new()).jobs, today);
        report.total_after_dedup = fresh.len();
        report.new_postings = fresh
            .iter()
            .filter(|job| !known.contains(&job.fingerprint()))
            .count();
        let curated = stamp_last_seen(self.baseline.clone(), today);
        let merged = merge_in_order([fresh, curated, carried]).jobs;
        report.total_merged = merged.len();

        report.advance(RunStage::Filtering);
        let before = merged.len();
        let relevant = merged
            .into_iter()
            .filter(|job| match self.relevance.check(job) {
                Ok(()) => true,
                Err(reason) => {
                    debug!(id = %job.id, ?reason, "dropped by relevance filter");
                    false
                }
            })
            .collect::<Vec<_>>();
        report.removed_by_relevance = before - relevant.len();

        report.advance(RunStage::Expiring);
        let before = relevant.len();
        let mut active = expire(relevant, self.config.max_age_days, today);
        report.removed_by_expiration = before - active.len();

        backfill_links(&mut active);
        Ok(active)
    }

    /// Decodes `jobs:live` record by record. A record that no longer fits the
    /// Job schema is dropped and noted in the report instead of failing the
    /// run, so one bad entry cannot freeze the live set.
    async fn load_carried(&self, report: &mut RunReport) -> Result<Vec<Job>> {
        let records: Vec<JsonValue> = get_json(self.store.as_ref(), keys::LIVE_JOBS)
            .await
            .context("loading carried-forward jobs")?
            .unwrap_or_default();
        let mut carried = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            match serde_json::from_value::<Job>(record) {
                Ok(job) => carried.push(job),
                Err(err) => {
                    warn!(index, error = %err, "skipping undecodable carried-forward job");
                    report
                        .errors
                        .push(format!("{}: skipped record {index}: {err}", keys::LIVE_JOBS));
                }
            }
        }
        Ok(carried)
    }

    /// Runs every fetcher on its own task. Results come back in registration
    /// order; a fetcher that panics contributes an empty batch and an error.
    /// Dropping the returned future (budget timeout) aborts the tasks.
    async fn fetch_all(&self, ctx: FetchContext) -> Vec<SourceBatch> {
        let mut tasks = FetchTasks(
            self.fetchers
                .iter()
                .map(|fetcher| {
                    let fetcher = Arc::clone(fetcher);
                    let ctx = ctx.clone();
                    tokio::spawn(async move { fetcher.fetch(&ctx).await })
                })
                .collect(),
        );

        join_all(tasks.0.iter_mut())
            .await
            .into_iter()
            .zip(&self.fetchers)
            .map(|(joined, fetcher)| match joined {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(source_id = fetcher.source_id(), error = %err, "fetcher task aborted");
                    SourceBatch {
                        source_id: fetcher.source_id().to_string(),
                        jobs: Vec::new(),
                        errors: vec![format!("{}: fetcher aborted: {err}", fetcher.source_id())],
                    }
                }
            })
            .collect()
    }

    /// Writes the fingerprints and the fetch timestamp, then the active set,
    /// then the succeeded report. `jobs:live` is the commit point: a failure
    /// before it fails the run with the previous snapshot intact, while a
    /// failed report write after it is only logged since the new snapshot is
    /// already being served.
    async fn persist(
        &self,
        report: &mut RunReport,
        active: &[Job],
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> Result<()> {
        report.advance(RunStage::Persisting);
        report.total_active = active.len();
        let finished_at = finish_time(started_at, clock);
        let mut finished = report.clone();
        finished.succeed(finished_at);

        let store = self.store.as_ref();
        let fingerprints = active.iter().map(Job::fingerprint).collect::<BTreeSet<_>>();
        set_json(store, keys::FINGERPRINTS, &fingerprints)
            .await
            .context("writing fingerprints")?;
        set_json(store, keys::LAST_FETCH, &finished_at.to_rfc3339())
            .await
            .context("writing last-fetch timestamp")?;
        set_json(store, keys::LIVE_JOBS, active)
            .await
            .context("writing live jobs")?;
        *report = finished;
        if let Err(err) = set_json(store, keys::CRON_LOG, &*report).await {
            warn!(run_id = %report.run_id, error = %format!("{err:#}"), "live jobs written but run report was not");
        }
        Ok(())
    }
}

/// Aborts still-running fetcher tasks when dropped.
struct FetchTasks(Vec<JoinHandle<SourceBatch>>);

impl Drop for FetchTasks {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

fn finish_time(started_at: DateTime<Utc>, clock: Instant) -> DateTime<Utc> {
    started_at + chrono::Duration::from_std(clock.elapsed()).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Builds a pipeline over a [`FileStore`] from the process environment and
/// runs it once.
pub async fn run_sync_once_from_env() -> Result<RunReport> {
    let config = SyncConfig::from_env();
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(config.store_dir.clone()));
    let pipeline = SyncPipeline::new(config, store)?;
    pipeline.run_once().await.map_err(anyhow::Error::from)
}

/// Latest RunReport written to `jobs:cron-log`, if any.
pub async fn latest_report(store: &dyn KeyValueStore) -> Result<Option<RunReport>> {
    get_json(store, keys::CRON_LOG).await
}

pub fn report_markdown(report: &RunReport) -> String {
    let mut lines = vec![
        "# Biomedical Job Hub sync report".to_string(),
        String::new(),
        format!("- run: `{}`", report.run_id),
        format!("- started: {}", report.started_at.to_rfc3339()),
    ];
    if let Some(finished) = report.finished_at {
        lines.push(format!("- finished: {}", finished.to_rfc3339()));
    }
    lines.push(format!("- stage: {}", report.stage));
    if let Some(stage) = report.failed_at {
        lines.push(format!("- failed during: {stage}"));
    }
    if let Some(error) = &report.error {
        lines.push(format!("- error: {error}"));
    }
    lines.push(format!("- duration: {} ms", report.duration_ms));
    lines.push(String::new());

    lines.push("## Counts".to_string());
    lines.push(format!("- fetched: {}", report.total_fetched));
    lines.push(format!("- after dedup: {}", report.total_after_dedup));
    lines.push(format!("- new postings: {}", report.new_postings));
    lines.push(format!("- carried forward: {}", report.carried_forward));
    lines.push(format!("- merged: {}", report.total_merged));
    lines.push(format!("- removed by relevance: {}", report.removed_by_relevance));
    lines.push(format!("- removed by expiration: {}", report.removed_by_expiration));
    lines.push(format!("- active: {}", report.total_active));
    lines.push(String::new());

    lines.push("## Sources".to_string());
    if report.sources.is_empty() {
        lines.push("- none".to_string());
    }
    for (source, count) in &report.sources {
        lines.push(format!("- {source}: {count}"));
    }

    if !report.errors.is_empty() {
        lines.push(String::new());
        lines.push("## Errors".to_string());
        for err in &report.errors {
            lines.push(format!("- {err}"));
        }
    }

    lines.join("\n")
}
