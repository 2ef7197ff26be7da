//! Persisted key/value state + HTTP fetch utilities for the job hub.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "bjh-storage";

/// Opaque JSON key/value store holding the pipeline's persisted state.
///
/// `get` returns `Ok(None)` for a key that has never been written; errors are
/// reserved for an unreachable or corrupt store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<JsonValue>>;
    async fn set(&self, key: &str, value: JsonValue) -> anyhow::Result<()>;
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> anyhow::Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => {
            let parsed = serde_json::from_value(value)
                .with_context(|| format!("decoding stored value for {key}"))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> anyhow::Result<()> {
    let value = serde_json::to_value(value).with_context(|| format!("encoding value for {key}"))?;
    store.set(key, value).await
}

/// One JSON file per key under a root directory.
///
/// `jobs:live` maps to `<root>/jobs/live.json`. Writes go through a temp file
/// in the target directory followed by a rename, so readers never observe a
/// half-written document.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let segments = key
            .split(':')
            .map(|segment| {
                segment
                    .chars()
                    .map(|c| {
                        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                            c
                        } else {
                            '_'
                        }
                    })
                    .collect::<String>()
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        let mut path = self.root.clone();
        match segments.split_last() {
            Some((last, parents)) => {
                for parent in parents {
                    path.push(parent);
                }
                path.push(format!("{last}.json"));
            }
            None => path.push("_.json"),
        }
        path
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<JsonValue>> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
        };
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: JsonValue) -> anyhow::Result<()> {
        let path = self.path_for(key);
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating store directory {}", parent.display()))?;

        let bytes = serde_json::to_vec(&value).with_context(|| format!("serializing {key}"))?;
        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            });
        }
        Ok(())
    }
}

/// In-process store; backs pipeline and handler tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, JsonValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<JsonValue>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: JsonValue) -> anyhow::Result<()> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            user_agent: None,
            global_concurrency: 16,
            per_source_concurrency: 4,
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|source| FetchError::Decode {
            url: self.final_url.clone(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    #[error("http status {status} for {url}: {snippet}")]
    HttpStatus {
        status: u16,
        url: String,
        snippet: String,
    },
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("malformed payload from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("http fetcher is shut down")]
    Closed,
}

/// Drops the query string, which may carry API credentials, before a URL is
/// logged or reported.
pub fn redacted_url(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.set_fragment(None);
    clean.to_string()
}

/// Joins `base` with URL-encoded query parameters.
pub fn build_url(base: &str, params: &[(&str, &str)]) -> Result<Url, FetchError> {
    let parsed = if params.is_empty() {
        Url::parse(base)
    } else {
        Url::parse_with_params(base, params)
    };
    parsed.map_err(|err| FetchError::InvalidUrl {
        url: base.to_string(),
        reason: err.to_string(),
    })
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
        })
    }

    async fn per_source_semaphore(&self, source_id: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    /// Issues one GET. Timeouts and non-2xx statuses come back as errors; the
    /// caller decides whether that unit of work is skipped. There is no retry.
    pub async fn get(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: Url,
        headers: &[(&str, &str)],
    ) -> Result<FetchedResponse, FetchError> {
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;
        let per_source = self.per_source_semaphore(source_id).await;
        let _source = per_source.acquire().await.map_err(|_| FetchError::Closed)?;

        let redacted = redacted_url(&url);
        let span = info_span!("http_fetch", %run_id, source_id, url = redacted.as_str());
        async move {
            let mut request = self.client.get(url);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            let resp = request
                .send()
                .await
                .map_err(|err| FetchError::Request(err.without_url()))?;
            let status = resp.status();
            let final_url = redacted_url(resp.url());

            if status.is_success() {
                let body = resp
                    .bytes()
                    .await
                    .map_err(|err| FetchError::Request(err.without_url()))?
                    .to_vec();
                tracing::debug!(status = status.as_u16(), bytes = body.len(), "fetched");
                return Ok(FetchedResponse {
                    status,
                    final_url,
                    body,
                });
            }

            let snippet = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect::<String>();
            Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
                snippet,
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn keys_map_to_nested_json_files() {
        let store = FileStore::new("/var/bjh");
        assert_eq!(store.path_for("jobs:live"), PathBuf::from("/var/bjh/jobs/live.json"));
        assert_eq!(
            store.path_for("jobs:last-fetch"),
            PathBuf::from("/var/bjh/jobs/last-fetch.json")
        );
        assert_eq!(store.path_for("../etc"), PathBuf::from("/var/bjh/___etc.json"));
    }

    #[tokio::test]
    async fn file_store_reports_missing_keys_as_none() {
        let dir = tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());
        assert!(store.get("jobs:live").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn file_store_overwrites_and_leaves_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());

        store.set("jobs:cron-log", json!({"runs": 1})).await.expect("first set");
        store.set("jobs:cron-log", json!({"runs": 2})).await.expect("second set");

        let value = store.get("jobs:cron-log").await.expect("get").expect("present");
        assert_eq!(value, json!({"runs": 2}));

        let leftovers = std::fs::read_dir(dir.path().join("jobs"))
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error_not_a_miss() {
        let dir = tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());
        std::fs::create_dir_all(dir.path().join("jobs")).unwrap();
        std::fs::write(dir.path().join("jobs/live.json"), b"{not json").unwrap();
        assert!(store.get("jobs:live").await.is_err());
    }

    #[tokio::test]
    async fn typed_helpers_round_trip_through_memory_store() {
        let store = MemoryStore::new();
        set_json(&store, "jobs:fingerprints", &vec!["abc", "def"])
            .await
            .expect("set");
        let back: Option<Vec<String>> = get_json(&store, "jobs:fingerprints").await.expect("get");
        assert_eq!(back, Some(vec!["abc".to_string(), "def".to_string()]));

        let missing: Option<Vec<String>> = get_json(&store, "jobs:live").await.expect("get");
        assert!(missing.is_none());
    }

    #[test]
    fn build_url_encodes_query_parameters() {
        let url = build_url(
            "https://api.example.com/v1/search",
            &[("what", "lab technician"), ("where", "New York")],
        )
        .expect("url");
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/search?what=lab+technician&where=New+York"
        );
        assert!(matches!(
            build_url("not a url", &[]),
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn redaction_strips_credentials_from_query() {
        let url = build_url(
            "https://api.adzuna.com/v1/api/jobs/us/search/1",
            &[("app_id", "id"), ("app_key", "secret")],
        )
        .expect("url");
        assert_eq!(
            redacted_url(&url),
            "https://api.adzuna.com/v1/api/jobs/us/search/1"
        );
    }

    #[tokio::test]
    async fn per_source_semaphores_are_shared_per_source() {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            per_source_concurrency: 2,
            ..Default::default()
        })
        .expect("fetcher");
        let a = fetcher.per_source_semaphore("adzuna").await;
        let b = fetcher.per_source_semaphore("adzuna").await;
        let c = fetcher.per_source_semaphore("feeds").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.available_permits(), 2);
    }
}
