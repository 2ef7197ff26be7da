//! Mapping from per-source raw fields to the canonical [`Job`] schema.

use bjh_core::{parse_loose_date, Job};
use chrono::NaiveDate;
use scraper::Html;

use crate::classify::ClassificationRules;
use crate::links::generate_search_links;

pub const DESCRIPTION_MAX_CHARS: usize = 500;

/// Source-side view of a posting before classification and defaulting.
#[derive(Debug, Clone, Default)]
pub struct PostingFields {
    pub id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub salary_min: Option<u64>,
    pub salary_max: Option<u64>,
    pub posted: Option<NaiveDate>,
    pub link: Option<String>,
    pub source: String,
    pub region: Option<String>,
    pub employer_type: Option<String>,
    pub job_type: Option<String>,
}

/// Builds a fully populated [`Job`]. Markup is stripped, the description is
/// truncated, classification fills whatever the source did not pin, a missing
/// posting date becomes `today` and a missing link falls back to the Indeed
/// search URL.
pub fn assemble(fields: PostingFields, rules: &ClassificationRules, today: NaiveDate) -> Job {
    let title = strip_html(&fields.title);
    let company = text_or_default(strip_html(&fields.company), "Unknown");
    let location = collapse_whitespace(&fields.location);
    let description = truncate_chars(&strip_html(&fields.description), DESCRIPTION_MAX_CHARS);

    let region = fields
        .region
        .unwrap_or_else(|| rules.region(&location).to_string());
    let employer_type = fields
        .employer_type
        .unwrap_or_else(|| rules.employer_type(&company).to_string());
    let job_type = fields
        .job_type
        .unwrap_or_else(|| rules.job_type(&title).to_string());
    let category = rules.category(&title, &description).to_string();

    let search_links = generate_search_links(&title, &company, &location);
    let link = fields
        .link
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| search_links.indeed.clone());

    Job {
        id: fields.id,
        title,
        company,
        lab: None,
        location,
        region,
        job_type,
        category,
        employer_type,
        salary: format_salary(fields.salary_min, fields.salary_max),
        salary_min: fields.salary_min,
        salary_max: fields.salary_max,
        description,
        requirements: Vec::new(),
        posted: Some(fields.posted.unwrap_or(today)),
        last_seen: None,
        link,
        search_links: Some(search_links),
        source: fields.source,
    }
}

/// Removes markup, decodes entities and collapses whitespace.
pub fn strip_html(input: &str) -> String {
    if !input.contains('<') && !input.contains('&') {
        return collapse_whitespace(input);
    }
    let fragment = Html::parse_fragment(input);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&text)
}

pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}

fn text_or_default(value: String, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value
    }
}

/// Display string for an annual salary range, e.g. `$45k–$60k/yr`.
pub fn format_salary(min: Option<u64>, max: Option<u64>) -> String {
    match (min.filter(|v| *v > 0), max.filter(|v| *v > 0)) {
        (Some(min), Some(max)) => format!("{}–{}/yr", thousands(min), thousands(max)),
        (Some(min), None) => format!("From {}/yr", thousands(min)),
        (None, Some(max)) => format!("Up to {}/yr", thousands(max)),
        (None, None) => "Salary not listed".to_string(),
    }
}

fn thousands(amount: u64) -> String {
    format!("${}k", (amount as f64 / 1000.0).round() as u64)
}

/// Rounds a raw salary figure; zero, negative and non-finite values are
/// treated as absent.
pub fn positive_amount(value: Option<f64>) -> Option<u64> {
    value
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(|v| v.round() as u64)
}

/// Posting dates use the same parser that decodes stored records, so a
/// value accepted here always survives a round trip through `jobs:live`.
pub fn parse_posted_date(raw: &str) -> Option<NaiveDate> {
    parse_loose_date(raw)
}
