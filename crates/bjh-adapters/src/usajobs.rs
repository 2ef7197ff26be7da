//! USAJOBS search API. Requires an API key and a registered contact address
//! sent as the user agent.

use async_trait::async_trait;
use bjh_core::Job;
use bjh_storage::build_url;
use chrono::NaiveDate;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::classify::ClassificationRules;
use crate::normalize::{assemble, parse_posted_date, PostingFields};
use crate::{AdapterError, FetchContext, SourceBatch, SourceFetcher, SourceKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsaJobsSettings {
    pub endpoint: String,
    pub keywords: Vec<String>,
    pub location_name: String,
    #[serde(default = "default_results_per_page")]
    pub results_per_page: u32,
}

fn default_results_per_page() -> u32 {
    25
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UsaJobsResponse {
    #[serde(default)]
    search_result: Option<SearchResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchResult {
    #[serde(default)]
    search_result_items: Vec<SearchResultItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchResultItem {
    matched_object_descriptor: PositionDescriptor,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PositionDescriptor {
    #[serde(rename = "PositionID")]
    pub position_id: String,
    pub position_title: String,
    #[serde(rename = "PositionURI")]
    pub position_uri: Option<String>,
    #[serde(rename = "ApplyURI")]
    pub apply_uri: Vec<String>,
    pub position_location: Vec<PositionLocation>,
    pub organization_name: Option<String>,
    pub department_name: Option<String>,
    pub position_remuneration: Vec<Remuneration>,
    pub qualification_summary: Option<String>,
    pub publication_start_date: Option<String>,
    pub user_area: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PositionLocation {
    pub location_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Remuneration {
    pub minimum_range: Option<JsonValue>,
    pub maximum_range: Option<JsonValue>,
}

pub struct UsaJobsFetcher {
    source_id: String,
    settings: UsaJobsSettings,
    credentials: Option<(String, String)>,
}

impl UsaJobsFetcher {
    /// `credentials` is `(api_key, user_agent)`.
    pub fn new(
        source_id: impl Into<String>,
        settings: UsaJobsSettings,
        credentials: Option<(String, String)>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            settings,
            credentials,
        }
    }

    async fn fetch_keyword(
        &self,
        ctx: &FetchContext,
        api_key: &str,
        user_agent: &str,
        keyword: &str,
    ) -> Result<Vec<Job>, AdapterError> {
        let per_page = self.settings.results_per_page.to_string();
        let url = build_url(
            &self.settings.endpoint,
            &[
                ("Keyword", keyword),
                ("LocationName", self.settings.location_name.as_str()),
                ("ResultsPerPage", per_page.as_str()),
            ],
        )?;
        let headers = [("Authorization-Key", api_key), ("User-Agent", user_agent)];
        let resp = ctx.http.get(ctx.run_id, &self.source_id, url, &headers).await?;
        let payload: UsaJobsResponse = resp.json()?;
        Ok(parse_items(payload, &ctx.rules, ctx.today))
    }
}

fn parse_items(payload: UsaJobsResponse, rules: &ClassificationRules, today: NaiveDate) -> Vec<Job> {
    payload
        .search_result
        .map(|r| r.search_result_items)
        .unwrap_or_default()
        .into_iter()
        .map(|item| usajobs_to_job(item.matched_object_descriptor, rules, today))
        .collect()
}

#[async_trait]
impl SourceFetcher for UsaJobsFetcher {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::AuthenticatedApi
    }

    async fn fetch(&self, ctx: &FetchContext) -> SourceBatch {
        let Some((api_key, user_agent)) = &self.credentials else {
            warn!(source_id = %self.source_id, "usajobs credentials not configured; skipping source");
            return SourceBatch::empty(&self.source_id);
        };

        let results = join_all(
            self.settings
                .keywords
                .iter()
                .map(|k| self.fetch_keyword(ctx, api_key, user_agent, k)),
        )
        .await;

        let mut batch = SourceBatch::empty(&self.source_id);
        for (keyword, result) in self.settings.keywords.iter().zip(results) {
            match result {
                Ok(jobs) => batch.jobs.extend(jobs),
                Err(err) => {
                    warn!(source_id = %self.source_id, keyword = %keyword, error = %err, "usajobs query failed");
                    batch
                        .errors
                        .push(format!("{}: keyword {keyword:?}: {err}", self.source_id));
                }
            }
        }
        info!(source_id = %self.source_id, jobs = batch.jobs.len(), errors = batch.errors.len(), "usajobs fetch complete");
        batch
    }
}

pub fn usajobs_to_job(raw: PositionDescriptor, rules: &ClassificationRules, today: NaiveDate) -> Job {
    let company = raw
        .organization_name
        .clone()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| raw.department_name.clone().filter(|s| !s.trim().is_empty()))
        .unwrap_or_else(|| "Federal Agency".to_string());
    let location = raw
        .position_location
        .first()
        .map(|l| l.location_name.clone())
        .unwrap_or_default();
    let pay = raw.position_remuneration.first();
    let description = raw
        .qualification_summary
        .clone()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| major_duties(raw.user_area.as_ref()))
        .unwrap_or_default();
    let link = raw
        .position_uri
        .clone()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| raw.apply_uri.first().cloned());

    assemble(
        PostingFields {
            id: format!("usajobs-{}", raw.position_id),
            title: raw.position_title,
            company,
            location,
            description,
            salary_min: pay.and_then(|p| range_amount(p.minimum_range.as_ref())),
            salary_max: pay.and_then(|p| range_amount(p.maximum_range.as_ref())),
            posted: raw.publication_start_date.as_deref().and_then(parse_posted_date),
            link,
            source: "Direct".to_string(),
            employer_type: Some("Government".to_string()),
            job_type: Some("Full-time".to_string()),
            ..PostingFields::default()
        },
        rules,
        today,
    )
}

/// Remuneration ranges arrive as decimal strings ("52121.0") or numbers.
fn range_amount(value: Option<&JsonValue>) -> Option<u64> {
    let amount = match value? {
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        JsonValue::Number(n) => n.as_f64(),
        _ => None,
    };
    crate::normalize::positive_amount(amount)
}

fn major_duties(user_area: Option<&JsonValue>) -> Option<String> {
    let duties = user_area?.get("Details")?.get("MajorDuties")?;
    let text = match duties {
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(items) => items
            .iter()
            .filter_map(JsonValue::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        _ => return None,
    };
    Some(text).filter(|t| !t.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture_jobs() -> Vec<Job> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/usajobs/search.json");
        let raw = std::fs::read_to_string(path).unwrap();
        let payload: UsaJobsResponse = serde_json::from_str(&raw).unwrap();
        let rules = ClassificationRules::builtin().unwrap();
        parse_items(payload, &rules, NaiveDate::from_ymd_opt(2026, 10, 18).unwrap())
    }

    #[test]
    fn fixture_maps_descriptor_fields() {
        let jobs = fixture_jobs();
        assert_eq!(jobs.len(), 2);

        let nih = &jobs[0];
        assert_eq!(nih.id, "usajobs-NIH-26-0042");
        assert_eq!(nih.company, "National Institutes of Health");
        assert_eq!(nih.location, "New York, New York");
        assert_eq!(nih.salary_min, Some(52_121));
        assert_eq!(nih.salary, "$52k–$68k/yr");
        assert_eq!(
            nih.description,
            "One year of specialized experience performing laboratory assays."
        );
        assert_eq!(nih.employer_type, "Government");
        assert_eq!(nih.job_type, "Full-time");
        assert_eq!(nih.posted, NaiveDate::from_ymd_opt(2026, 10, 5));
        assert_eq!(nih.link, "https://www.usajobs.gov/job/801234500");
        assert_eq!(nih.source, "Direct");
    }

    #[test]
    fn fixture_falls_back_to_department_duties_and_apply_uri() {
        let jobs = fixture_jobs();
        let va = &jobs[1];
        assert_eq!(va.company, "Department of Veterans Affairs");
        assert_eq!(va.region, "NJ");
        assert_eq!(va.salary, "Salary not listed");
        assert_eq!(
            va.description,
            "Identify bacterial isolates in the clinical microbiology lab."
        );
        assert_eq!(va.link, "https://www.usajobs.gov/job/801234501/apply");
    }

    #[test]
    fn missing_agency_names_default() {
        let rules = ClassificationRules::builtin().unwrap();
        let job = usajobs_to_job(
            PositionDescriptor {
                position_id: "X".into(),
                position_title: "Pharmacologist".into(),
                ..PositionDescriptor::default()
            },
            &rules,
            NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
        );
        assert_eq!(job.company, "Federal Agency");
        assert_eq!(job.posted, NaiveDate::from_ymd_opt(2026, 10, 18));
    }
}
