//! Adzuna search API. Every query is run against every configured location.

use std::sync::OnceLock;

use async_trait::async_trait;
use bjh_core::Job;
use bjh_storage::build_url;
use chrono::NaiveDate;
use futures::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::ClassificationRules;
use crate::normalize::{assemble, positive_amount, parse_posted_date, PostingFields};
use crate::{AdapterError, FetchContext, SourceBatch, SourceFetcher, SourceKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdzunaSettings {
    pub endpoint: String,
    pub queries: Vec<String>,
    pub locations: Vec<String>,
    #[serde(default = "default_results_per_page")]
    pub results_per_page: u32,
    #[serde(default = "default_max_days_old")]
    pub max_days_old: u32,
    #[serde(default)]
    pub what_exclude: Option<String>,
    #[serde(default)]
    pub salary_max: Option<u64>,
    /// Postings whose description advertises a figure at or above this
    /// amount are dropped at the source.
    #[serde(default)]
    pub description_salary_ceiling: Option<u64>,
}

fn default_results_per_page() -> u32 {
    20
}

fn default_max_days_old() -> u32 {
    30
}

#[derive(Debug, Deserialize)]
struct AdzunaResponse {
    #[serde(default)]
    results: Vec<AdzunaPosting>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdzunaPosting {
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: Option<DisplayName>,
    #[serde(default)]
    pub location: Option<DisplayName>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub salary_min: Option<f64>,
    #[serde(default)]
    pub salary_max: Option<f64>,
    #[serde(default)]
    pub created: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayName {
    #[serde(default)]
    pub display_name: String,
}

pub struct AdzunaFetcher {
    source_id: String,
    settings: AdzunaSettings,
    credentials: Option<(String, String)>,
}

impl AdzunaFetcher {
    /// `credentials` is `(app_id, app_key)`.
    pub fn new(
        source_id: impl Into<String>,
        settings: AdzunaSettings,
        credentials: Option<(String, String)>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            settings,
            credentials,
        }
    }

    async fn fetch_query(
        &self,
        ctx: &FetchContext,
        app_id: &str,
        app_key: &str,
        query: &str,
        location: &str,
    ) -> Result<Vec<Job>, AdapterError> {
        let per_page = self.settings.results_per_page.to_string();
        let max_days = self.settings.max_days_old.to_string();
        let salary_max = self.settings.salary_max.map(|v| v.to_string());
        let mut params = vec![
            ("app_id", app_id),
            ("app_key", app_key),
            ("what", query),
            ("where", location),
            ("results_per_page", per_page.as_str()),
            ("max_days_old", max_days.as_str()),
            ("sort_by", "date"),
            ("content-type", "application/json"),
        ];
        if let Some(exclude) = self.settings.what_exclude.as_deref() {
            params.push(("what_exclude", exclude));
        }
        if let Some(max) = salary_max.as_deref() {
            params.push(("salary_max", max));
        }
        let url = build_url(&self.settings.endpoint, &params)?;
        let resp = ctx.http.get(ctx.run_id, &self.source_id, url, &[]).await?;
        let payload: AdzunaResponse = resp.json()?;
        Ok(self.parse_results(payload.results, &ctx.rules, ctx.today))
    }

    fn parse_results(
        &self,
        results: Vec<AdzunaPosting>,
        rules: &ClassificationRules,
        today: NaiveDate,
    ) -> Vec<Job> {
        results
            .into_iter()
            .filter(|raw| {
                self.settings
                    .description_salary_ceiling
                    .map_or(true, |ceiling| !mentions_salary_at_least(&raw.description, ceiling))
            })
            .map(|raw| adzuna_to_job(raw, rules, today))
            .collect()
    }
}

#[async_trait]
impl SourceFetcher for AdzunaFetcher {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::AuthenticatedApi
    }

    async fn fetch(&self, ctx: &FetchContext) -> SourceBatch {
        let Some((app_id, app_key)) = &self.credentials else {
            warn!(source_id = %self.source_id, "adzuna credentials not configured; skipping source");
            return SourceBatch::empty(&self.source_id);
        };

        let combos = self
            .settings
            .queries
            .iter()
            .flat_map(|q| self.settings.locations.iter().map(move |l| (q, l)))
            .collect::<Vec<_>>();
        let results = join_all(
            combos
                .iter()
                .map(|(q, l)| self.fetch_query(ctx, app_id, app_key, q, l)),
        )
        .await;

        let mut batch = SourceBatch::empty(&self.source_id);
        for ((query, location), result) in combos.iter().zip(results) {
            match result {
                Ok(jobs) => batch.jobs.extend(jobs),
                Err(err) => {
                    warn!(source_id = %self.source_id, query = %query, location = %location, error = %err, "adzuna query failed");
                    batch.errors.push(format!(
                        "{}: query {query:?} in {location:?}: {err}",
                        self.source_id
                    ));
                }
            }
        }
        info!(source_id = %self.source_id, jobs = batch.jobs.len(), errors = batch.errors.len(), "adzuna fetch complete");
        batch
    }
}

/// Adzuna postings link through Indeed search rather than the Adzuna
/// redirect, so `link` is left to the search-link fallback.
pub fn adzuna_to_job(raw: AdzunaPosting, rules: &ClassificationRules, today: NaiveDate) -> Job {
    let id = match &raw.id {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };
    let display_name = raw.location.map(|l| l.display_name).unwrap_or_default();
    // Region comes from the full "Town, County, State" name; only the
    // displayed location is shortened.
    let region = rules.region(&display_name).to_string();
    let location = display_name
        .split(',')
        .map(str::trim)
        .take(2)
        .collect::<Vec<_>>()
        .join(", ");
    assemble(
        PostingFields {
            id: format!("adzuna-{id}"),
            title: raw.title,
            company: raw.company.map(|c| c.display_name).unwrap_or_default(),
            location,
            description: raw.description,
            salary_min: positive_amount(raw.salary_min),
            salary_max: positive_amount(raw.salary_max),
            posted: raw.created.as_deref().and_then(parse_posted_date),
            link: None,
            source: "Indeed".to_string(),
            region: Some(region),
            ..PostingFields::default()
        },
        rules,
        today,
    )
}

/// True when the text contains a dollar figure such as `$150,000` or
/// `$150000` at or above `ceiling`.
pub fn mentions_salary_at_least(text: &str, ceiling: u64) -> bool {
    static DOLLARS: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = DOLLARS
        .get_or_init(|| Regex::new(r"\$\s?(\d{1,3}(?:,\d{3})+|\d{4,})").ok())
        .as_ref()
    else {
        return false;
    };
    re.captures_iter(text).any(|caps| {
        caps[1]
            .replace(',', "")
            .parse::<u64>()
            .is_ok_and(|amount| amount >= ceiling)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn workspace_root() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
    }

    fn settings() -> AdzunaSettings {
        AdzunaSettings {
            endpoint: "https://api.adzuna.com/v1/api/jobs/us/search/1".into(),
            queries: vec!["lab technician".into()],
            locations: vec!["New York".into()],
            results_per_page: 20,
            max_days_old: 30,
            what_exclude: None,
            salary_max: None,
            description_salary_ceiling: Some(150_000),
        }
    }

    fn fixture() -> Vec<AdzunaPosting> {
        let raw = std::fs::read_to_string(workspace_root().join("fixtures/adzuna/search.json")).unwrap();
        serde_json::from_str::<AdzunaResponse>(&raw).unwrap().results
    }

    #[test]
    fn fixture_parses_into_jobs_and_drops_high_salary_postings() {
        let fetcher = AdzunaFetcher::new("adzuna", settings(), None);
        let rules = ClassificationRules::builtin().unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let jobs = fetcher.parse_results(fixture(), &rules, today);

        assert_eq!(jobs.len(), 2);
        let first = &jobs[0];
        assert_eq!(first.id, "adzuna-4711001");
        assert_eq!(first.title, "Research Technician - Molecular Biology");
        assert_eq!(first.company, "Columbia University");
        assert_eq!(first.location, "New York City, New York");
        assert_eq!(first.employer_type, "Academic");
        assert_eq!(first.category, "Molecular & Cell Biology");
        assert_eq!(first.salary, "$49k–$55k/yr");
        assert_eq!(first.posted, NaiveDate::from_ymd_opt(2026, 10, 12));
        assert_eq!(first.source, "Indeed");
        assert!(first.link.starts_with("https://www.indeed.com/jobs?q="));

        let second = &jobs[1];
        assert_eq!(second.company, "Unknown");
        assert_eq!(second.region, "NJ");
        assert_eq!(second.salary, "Salary not listed");
    }

    #[test]
    fn region_uses_the_full_display_name() {
        let rules = ClassificationRules::builtin().unwrap();
        let raw = AdzunaPosting {
            id: serde_json::json!(99),
            title: "Laboratory Technician".into(),
            company: Some(DisplayName {
                display_name: "Summit Therapeutics".into(),
            }),
            location: Some(DisplayName {
                display_name: "Summit, Union County, New Jersey".into(),
            }),
            description: "Run cell culture assays.".into(),
            salary_min: None,
            salary_max: None,
            created: None,
        };
        let job = adzuna_to_job(raw, &rules, NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());
        assert_eq!(job.location, "Summit, Union County");
        assert_eq!(job.region, "NJ");
        assert_eq!(job.id, "adzuna-99");
    }

    #[test]
    fn salary_mentions() {
        assert!(mentions_salary_at_least("pays $160,000 per year", 150_000));
        assert!(mentions_salary_at_least("pays $150000", 150_000));
        assert!(!mentions_salary_at_least("pays $65,000 to $80,000", 150_000));
        assert!(!mentions_salary_at_least("no figures", 150_000));
    }

    #[tokio::test]
    async fn missing_credentials_yield_empty_batch() {
        let fetcher = AdzunaFetcher::new("adzuna", settings(), None);
        let ctx = FetchContext {
            run_id: uuid::Uuid::nil(),
            today: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
            http: std::sync::Arc::new(
                bjh_storage::HttpFetcher::new(bjh_storage::HttpClientConfig::default()).unwrap(),
            ),
            rules: std::sync::Arc::new(ClassificationRules::builtin().unwrap()),
        };
        let batch = fetcher.fetch(&ctx).await;
        assert_eq!(batch, SourceBatch::empty("adzuna"));
    }
}
