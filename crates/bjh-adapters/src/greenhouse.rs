//! Public Greenhouse job-board API, one request per company board.

use async_trait::async_trait;
use bjh_core::Job;
use bjh_storage::build_url;
use chrono::NaiveDate;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::ClassificationRules;
use crate::normalize::{assemble, parse_posted_date, strip_html, PostingFields};
use crate::{AdapterError, FetchContext, SourceBatch, SourceFetcher, SourceKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreenhouseBoard {
    pub token: String,
    pub company: String,
    /// Pinned region; boards outside the NYC/NJ area would otherwise fall
    /// through to the default region.
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreenhouseSettings {
    pub endpoint: String,
    pub boards: Vec<GreenhouseBoard>,
}

#[derive(Debug, Deserialize)]
struct BoardResponse {
    #[serde(default)]
    jobs: Vec<GreenhousePosting>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GreenhousePosting {
    pub id: u64,
    pub title: String,
    pub absolute_url: String,
    pub location: Option<GreenhouseLocation>,
    pub updated_at: Option<String>,
    pub first_published: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GreenhouseLocation {
    pub name: String,
}

pub struct GreenhouseFetcher {
    source_id: String,
    settings: GreenhouseSettings,
}

impl GreenhouseFetcher {
    pub fn new(source_id: impl Into<String>, settings: GreenhouseSettings) -> Self {
        Self {
            source_id: source_id.into(),
            settings,
        }
    }

    async fn fetch_board(&self, ctx: &FetchContext, board: &GreenhouseBoard) -> Result<Vec<Job>, AdapterError> {
        let base = format!(
            "{}/{}/jobs",
            self.settings.endpoint.trim_end_matches('/'),
            board.token
        );
        let url = build_url(&base, &[("content", "true")])?;
        let resp = ctx.http.get(ctx.run_id, &self.source_id, url, &[]).await?;
        let payload: BoardResponse = resp.json()?;
        Ok(payload
            .jobs
            .into_iter()
            .map(|raw| greenhouse_to_job(board, raw, &ctx.rules, ctx.today))
            .collect())
    }
}

#[async_trait]
impl SourceFetcher for GreenhouseFetcher {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    async fn fetch(&self, ctx: &FetchContext) -> SourceBatch {
        let results = join_all(self.settings.boards.iter().map(|b| self.fetch_board(ctx, b))).await;

        let mut batch = SourceBatch::empty(&self.source_id);
        for (board, result) in self.settings.boards.iter().zip(results) {
            match result {
                Ok(jobs) => batch.jobs.extend(jobs),
                Err(err) => {
                    warn!(source_id = %self.source_id, board = %board.token, error = %err, "greenhouse board failed");
                    batch
                        .errors
                        .push(format!("{}: board {}: {err}", self.source_id, board.token));
                }
            }
        }
        info!(source_id = %self.source_id, jobs = batch.jobs.len(), errors = batch.errors.len(), "greenhouse fetch complete");
        batch
    }
}

pub fn greenhouse_to_job(
    board: &GreenhouseBoard,
    raw: GreenhousePosting,
    rules: &ClassificationRules,
    today: NaiveDate,
) -> Job {
    let location = raw
        .location
        .map(|l| l.name)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "Remote".to_string());
    // Board content is HTML that has itself been entity-escaped.
    let description = raw
        .content
        .as_deref()
        .map(|c| strip_html(&strip_html(c)))
        .unwrap_or_default();
    let posted = raw
        .first_published
        .as_deref()
        .or(raw.updated_at.as_deref())
        .and_then(parse_posted_date);

    assemble(
        PostingFields {
            id: format!("greenhouse-{}-{}", board.token, raw.id),
            title: raw.title,
            company: board.company.clone(),
            location,
            description,
            posted,
            link: Some(raw.absolute_url),
            source: "Direct".to_string(),
            region: board.region.clone(),
            ..PostingFields::default()
        },
        rules,
        today,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, serve};
    use axum::{routing::get, Router};
    use std::path::PathBuf;

    fn fixture_path() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/greenhouse/jobs.json")
    }

    #[tokio::test]
    async fn undecodable_board_is_recorded_and_skipped() {
        let body = std::fs::read_to_string(fixture_path()).unwrap();
        let base = serve(
            Router::new()
                .route(
                    "/modernatx/jobs",
                    get(move || {
                        let body = body.clone();
                        async move { body }
                    }),
                )
                .route("/blueprintmedicines/jobs", get(|| async { "<html>rate limited</html>" })),
        )
        .await;

        let fetcher = GreenhouseFetcher::new(
            "greenhouse",
            GreenhouseSettings {
                endpoint: base,
                boards: vec![
                    GreenhouseBoard {
                        token: "modernatx".into(),
                        company: "Moderna".into(),
                        region: Some("MA".into()),
                    },
                    GreenhouseBoard {
                        token: "blueprintmedicines".into(),
                        company: "Blueprint Medicines".into(),
                        region: Some("MA".into()),
                    },
                ],
            },
        );
        let batch = fetcher.fetch(&context()).await;

        assert_eq!(batch.jobs.len(), 2);
        assert!(batch.jobs.iter().all(|j| j.company == "Moderna"));
        assert_eq!(batch.errors.len(), 1);
        assert!(batch.errors[0].starts_with("greenhouse: board blueprintmedicines: malformed payload"));
    }

    #[test]
    fn board_fixture_maps_to_jobs() {
        let path = fixture_path();
        let payload: BoardResponse = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        let rules = ClassificationRules::builtin().unwrap();
        let board = GreenhouseBoard {
            token: "modernatx".into(),
            company: "Moderna".into(),
            region: Some("MA".into()),
        };
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let jobs = payload
            .jobs
            .into_iter()
            .map(|raw| greenhouse_to_job(&board, raw, &rules, today))
            .collect::<Vec<_>>();

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "greenhouse-modernatx-6012345");
        assert_eq!(jobs[0].company, "Moderna");
        assert_eq!(jobs[0].region, "MA");
        assert_eq!(jobs[0].description, "Run assay development for mRNA therapeutics.");
        assert_eq!(jobs[0].category, "Drug Discovery & Pharmacology");
        assert_eq!(jobs[0].posted, NaiveDate::from_ymd_opt(2026, 10, 1));
        assert_eq!(jobs[0].link, "https://boards.greenhouse.io/modernatx/jobs/6012345");
        assert_eq!(jobs[1].location, "Remote");
        assert_eq!(jobs[1].posted, NaiveDate::from_ymd_opt(2026, 10, 14));
    }
}
