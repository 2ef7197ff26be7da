//! Source fetcher contracts, the source registry and the per-source fetchers.
//!
//! Each fetcher turns one external source into a batch of normalized [`Job`]
//! records. A fetcher never fails the run: query-level problems are recorded
//! in [`SourceBatch::errors`] and whatever was fetched is still returned.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bjh_core::Job;
use bjh_storage::{FetchError, HttpFetcher};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod adzuna;
pub mod classify;
pub mod feeds;
pub mod greenhouse;
pub mod links;
pub mod normalize;
pub mod usajobs;

pub use adzuna::{AdzunaFetcher, AdzunaSettings};
pub use classify::{ClassificationRules, RuleTable, TagRule};
pub use feeds::{FeedFetcher, FeedFormat, FeedSettings, FeedSpec};
pub use greenhouse::{GreenhouseBoard, GreenhouseFetcher, GreenhouseSettings};
pub use links::generate_search_links;
pub use usajobs::{UsaJobsFetcher, UsaJobsSettings};

pub const CRATE_NAME: &str = "bjh-adapters";

const BUILTIN_SOURCES_YAML: &str = include_str!("../../../sources.yaml");

/// How a source is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Api,
    AuthenticatedApi,
    Feed,
}

/// Everything a fetcher needs from the run that invokes it.
#[derive(Clone)]
pub struct FetchContext {
    pub run_id: Uuid,
    pub today: NaiveDate,
    pub http: Arc<HttpFetcher>,
    pub rules: Arc<ClassificationRules>,
}

/// Result of one fetcher invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceBatch {
    pub source_id: String,
    pub jobs: Vec<Job>,
    pub errors: Vec<String>,
}

impl SourceBatch {
    pub fn empty(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            jobs: Vec::new(),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn source_id(&self) -> &str;
    fn kind(&self) -> SourceKind;

    /// Fetch and normalize the whole source. Partial failures end up in the
    /// returned batch's `errors`; a source that cannot be queried at all
    /// returns an empty batch.
    async fn fetch(&self, ctx: &FetchContext) -> SourceBatch;
}

/// Credentials read from the process environment. A missing credential
/// disables the source that needs it for the run.
#[derive(Debug, Clone, Default)]
pub struct SourceCredentials {
    pub adzuna_app_id: Option<String>,
    pub adzuna_app_key: Option<String>,
    pub usajobs_api_key: Option<String>,
    pub usajobs_user_agent: Option<String>,
}

impl SourceCredentials {
    pub fn from_env() -> Self {
        Self {
            adzuna_app_id: non_empty_env("ADZUNA_API_ID"),
            adzuna_app_key: non_empty_env("ADZUNA_API_KEY"),
            usajobs_api_key: non_empty_env("USAJOBS_API_KEY"),
            usajobs_user_agent: non_empty_env("USAJOBS_USER_AGENT"),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRegistry {
    pub version: u32,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub display_name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub settings: SourceSettings,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSettings {
    Adzuna(AdzunaSettings),
    Usajobs(UsaJobsSettings),
    Feeds(FeedSettings),
    Greenhouse(GreenhouseSettings),
}

impl SourceRegistry {
    /// Registry compiled into the binary.
    pub fn builtin() -> Result<Self> {
        serde_yaml::from_str(BUILTIN_SOURCES_YAML).context("parsing built-in sources.yaml")
    }

    /// Reads `sources.yaml` from the workspace root, falling back to the
    /// built-in copy when the file is absent.
    pub fn load(workspace_root: impl AsRef<Path>) -> Result<Self> {
        let path = workspace_root.as_ref().join("sources.yaml");
        if !path.exists() {
            return Self::builtin();
        }
        let raw = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

/// Builds fetchers for every enabled source, in registry order. Registry
/// order is also the precedence order when fresh batches are merged.
pub fn fetchers_from_registry(
    registry: &SourceRegistry,
    credentials: &SourceCredentials,
) -> Vec<Arc<dyn SourceFetcher>> {
    registry
        .enabled()
        .map(|source| -> Arc<dyn SourceFetcher> {
            let id = source.source_id.clone();
            match &source.settings {
                SourceSettings::Adzuna(settings) => Arc::new(AdzunaFetcher::new(
                    id,
                    settings.clone(),
                    credentials
                        .adzuna_app_id
                        .clone()
                        .zip(credentials.adzuna_app_key.clone()),
                )),
                SourceSettings::Usajobs(settings) => Arc::new(UsaJobsFetcher::new(
                    id,
                    settings.clone(),
                    credentials
                        .usajobs_api_key
                        .clone()
                        .zip(credentials.usajobs_user_agent.clone()),
                )),
                SourceSettings::Feeds(settings) => Arc::new(FeedFetcher::new(id, settings.clone())),
                SourceSettings::Greenhouse(settings) => {
                    Arc::new(GreenhouseFetcher::new(id, settings.clone()))
                }
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::Router;
    use bjh_storage::{HttpClientConfig, HttpFetcher};
    use chrono::NaiveDate;
    use tokio::net::TcpListener;
    use uuid::Uuid;

    use crate::{ClassificationRules, FetchContext};

    /// Serves `router` on an ephemeral local port and returns its base URL.
    pub async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    pub fn context() -> FetchContext {
        FetchContext {
            run_id: Uuid::nil(),
            today: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
            http: Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap()),
            rules: Arc::new(ClassificationRules::builtin().unwrap()),
        }
    }
}
