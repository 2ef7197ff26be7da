use std::path::{Path, PathBuf};

use bjh_adapters::adzuna::{adzuna_to_job, AdzunaPosting};
use bjh_adapters::feeds::{feed_item_to_job, parse_feed};
use bjh_adapters::greenhouse::{greenhouse_to_job, GreenhousePosting};
use bjh_adapters::usajobs::{usajobs_to_job, PositionDescriptor};
use bjh_adapters::{ClassificationRules, FeedFormat, GreenhouseBoard};
use bjh_core::Job;
use chrono::NaiveDate;
use serde_json::Value as JsonValue;

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn read(rel: &str) -> String {
    std::fs::read_to_string(workspace_root().join(rel)).unwrap()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
}

fn all_fixture_jobs() -> Vec<Job> {
    let rules = ClassificationRules::load(workspace_root()).unwrap();
    let mut jobs = Vec::new();

    let adzuna: JsonValue = serde_json::from_str(&read("fixtures/adzuna/search.json")).unwrap();
    let postings: Vec<AdzunaPosting> = serde_json::from_value(adzuna["results"].clone()).unwrap();
    jobs.extend(postings.into_iter().map(|p| adzuna_to_job(p, &rules, today())));

    let usajobs: JsonValue = serde_json::from_str(&read("fixtures/usajobs/search.json")).unwrap();
    for item in usajobs["SearchResult"]["SearchResultItems"].as_array().unwrap() {
        let descriptor: PositionDescriptor =
            serde_json::from_value(item["MatchedObjectDescriptor"].clone()).unwrap();
        jobs.push(usajobs_to_job(descriptor, &rules, today()));
    }

    for (name, file) in [
        ("science-careers", "fixtures/feeds/science.rss.xml"),
        ("nature-jobs", "fixtures/feeds/nature.atom.xml"),
    ] {
        for item in parse_feed(&read(file), FeedFormat::Auto).unwrap() {
            jobs.push(feed_item_to_job(name, item, "New York, NY", &rules, today()));
        }
    }

    let board = GreenhouseBoard {
        token: "modernatx".into(),
        company: "Moderna".into(),
        region: Some("MA".into()),
    };
    let greenhouse: JsonValue = serde_json::from_str(&read("fixtures/greenhouse/jobs.json")).unwrap();
    let postings: Vec<GreenhousePosting> = serde_json::from_value(greenhouse["jobs"].clone()).unwrap();
    jobs.extend(postings.into_iter().map(|p| greenhouse_to_job(&board, p, &rules, today())));

    jobs
}

#[test]
fn every_fixture_job_has_a_complete_schema() {
    let jobs = all_fixture_jobs();
    assert_eq!(jobs.len(), 3 + 2 + 5 + 2);
    for job in &jobs {
        assert!(!job.id.is_empty(), "{job:?}");
        assert!(!job.title.is_empty(), "{job:?}");
        assert!(!job.company.is_empty(), "{job:?}");
        assert!(!job.region.is_empty(), "{job:?}");
        assert!(!job.category.is_empty(), "{job:?}");
        assert!(!job.employer_type.is_empty(), "{job:?}");
        assert!(!job.job_type.is_empty(), "{job:?}");
        assert!(!job.salary.is_empty(), "{job:?}");
        assert!(job.posted.is_some(), "{job:?}");
        assert!(job.link.starts_with("https://"), "{job:?}");
        assert!(job.search_links.is_some(), "{job:?}");
        assert!(job.description.chars().count() <= 500, "{job:?}");
        assert!(!job.description.contains('<'), "{job:?}");
    }
}

#[test]
fn fixture_ids_and_fingerprints_are_distinct() {
    let jobs = all_fixture_jobs();
    let ids = jobs.iter().map(|j| j.id.clone()).collect::<std::collections::BTreeSet<_>>();
    let fingerprints = jobs
        .iter()
        .map(|j| j.fingerprint())
        .collect::<std::collections::BTreeSet<_>>();
    assert_eq!(ids.len(), jobs.len());
    assert_eq!(fingerprints.len(), jobs.len());
}
