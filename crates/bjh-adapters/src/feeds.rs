//! RSS 2.0 and Atom career feeds.
//!
//! Items are extracted by pattern, not by a validating XML parser; a malformed
//! item affects only itself.

use std::sync::OnceLock;

use async_trait::async_trait;
use bjh_core::Job;
use bjh_storage::build_url;
use chrono::NaiveDate;
use futures::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::classify::{contains_any, ClassificationRules};
use crate::normalize::{assemble, parse_posted_date, strip_html, PostingFields};
use crate::{AdapterError, FetchContext, SourceBatch, SourceFetcher, SourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFormat {
    Rss,
    Atom,
    /// Atom when the document has `<entry` blocks and no `<item` blocks.
    #[default]
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSpec {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub format: FeedFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSettings {
    /// Feeds carry no structured location, so every item gets this one.
    pub default_location: String,
    /// Items whose title and description mention none of these are skipped.
    /// An empty list keeps everything.
    #[serde(default)]
    pub prefilter_keywords: Vec<String>,
    pub feeds: Vec<FeedSpec>,
}

/// One `<item>` or `<entry>`, with markup already removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published: String,
}

pub struct FeedFetcher {
    source_id: String,
    settings: FeedSettings,
}

impl FeedFetcher {
    pub fn new(source_id: impl Into<String>, settings: FeedSettings) -> Self {
        Self {
            source_id: source_id.into(),
            settings,
        }
    }

    async fn fetch_feed(&self, ctx: &FetchContext, feed: &FeedSpec) -> Result<Vec<Job>, AdapterError> {
        let url = build_url(&feed.url, &[])?;
        let resp = ctx.http.get(ctx.run_id, &self.source_id, url, &[]).await?;
        let items = parse_feed(&resp.text(), feed.format)?;
        debug!(source_id = %self.source_id, feed = %feed.name, items = items.len(), "parsed feed");
        Ok(self.items_to_jobs(&feed.name, items, &ctx.rules, ctx.today))
    }

    fn items_to_jobs(
        &self,
        feed_name: &str,
        items: Vec<FeedItem>,
        rules: &ClassificationRules,
        today: NaiveDate,
    ) -> Vec<Job> {
        items
            .into_iter()
            .filter(|item| !item.title.is_empty())
            .filter(|item| {
                self.settings.prefilter_keywords.is_empty()
                    || contains_any(
                        &format!("{} {}", item.title, item.description).to_lowercase(),
                        &self.settings.prefilter_keywords,
                    )
            })
            .map(|item| feed_item_to_job(feed_name, item, &self.settings.default_location, rules, today))
            .collect()
    }
}

#[async_trait]
impl SourceFetcher for FeedFetcher {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Feed
    }

    async fn fetch(&self, ctx: &FetchContext) -> SourceBatch {
        let results = join_all(self.settings.feeds.iter().map(|f| self.fetch_feed(ctx, f))).await;

        let mut batch = SourceBatch::empty(&self.source_id);
        for (feed, result) in self.settings.feeds.iter().zip(results) {
            match result {
                Ok(jobs) => batch.jobs.extend(jobs),
                Err(err) => {
                    warn!(source_id = %self.source_id, feed = %feed.name, error = %err, "feed fetch failed");
                    batch
                        .errors
                        .push(format!("{}: feed {}: {err}", self.source_id, feed.name));
                }
            }
        }
        info!(source_id = %self.source_id, jobs = batch.jobs.len(), errors = batch.errors.len(), "feed fetch complete");
        batch
    }
}

/// Feed titles usually read "Role - Employer" or "Role at Employer".
pub fn split_title_company(raw_title: &str) -> (String, String) {
    let company = if let Some((_, company)) = raw_title.rsplit_once(" - ") {
        company.trim().to_string()
    } else if let Some((_, company)) = raw_title.rsplit_once(" at ") {
        company.trim().to_string()
    } else {
        String::new()
    };
    let title = raw_title
        .split(" - ")
        .next()
        .and_then(|t| t.split(" at ").next())
        .unwrap_or(raw_title)
        .trim()
        .to_string();
    (title, company)
}

pub fn feed_item_to_job(
    feed_name: &str,
    item: FeedItem,
    default_location: &str,
    rules: &ClassificationRules,
    today: NaiveDate,
) -> Job {
    let (title, company) = split_title_company(&item.title);
    let digest = hex::encode(Sha256::digest(format!("{}{}", item.title, item.link).as_bytes()));
    assemble(
        PostingFields {
            id: format!("rss-{feed_name}-{}", &digest[..12]),
            title,
            company,
            location: default_location.to_string(),
            description: item.description,
            posted: parse_posted_date(&item.published),
            link: Some(item.link),
            source: "Direct".to_string(),
            ..PostingFields::default()
        },
        rules,
        today,
    )
}

/// Element patterns, compiled once per process.
struct FeedPatterns {
    item: Regex,
    entry: Regex,
    title: Regex,
    link: Regex,
    description: Regex,
    summary: Regex,
    content: Regex,
    updated: Regex,
    published: Regex,
    pub_date: Regex,
    dc_date: Regex,
    cdata: Regex,
    href: Regex,
}

impl FeedPatterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            item: element("item")?,
            entry: element("entry")?,
            title: element("title")?,
            link: element("link")?,
            description: element("description")?,
            summary: element("summary")?,
            content: element("content")?,
            updated: element("updated")?,
            published: element("published")?,
            pub_date: element("pubDate")?,
            dc_date: element("dc:date")?,
            cdata: Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>")?,
            href: Regex::new(r#"(?i)<link[^>]*href=["']([^"']+)["'][^>]*/?>"#)?,
        })
    }

    fn get() -> Result<&'static Self, AdapterError> {
        static PATTERNS: OnceLock<Result<FeedPatterns, regex::Error>> = OnceLock::new();
        PATTERNS
            .get_or_init(Self::compile)
            .as_ref()
            .map_err(|err| AdapterError::Message(format!("feed patterns failed to compile: {err}")))
    }

    fn blocks<'a>(&self, re: &Regex, xml: &'a str) -> Vec<&'a str> {
        re.captures_iter(xml)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// Text of the first match in `block`, CDATA unwrapped and markup removed.
    /// Atom `type="html"` bodies are entity-escaped, hence the second pass.
    fn text(&self, re: &Regex, block: &str) -> String {
        re.captures(block)
            .and_then(|caps| caps.get(1))
            .map(|m| {
                let unwrapped = self.cdata.replace_all(m.as_str(), "$1");
                strip_html(&strip_html(&unwrapped))
            })
            .unwrap_or_default()
    }

    fn first_non_empty(&self, block: &str, res: &[&Regex]) -> String {
        res.iter()
            .map(|re| self.text(re, block))
            .find(|text| !text.is_empty())
            .unwrap_or_default()
    }

    fn atom_link(&self, block: &str) -> String {
        self.href
            .captures(block)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    }
}

fn element(tag: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"(?is)<{0}(?:\s[^>]*)?>(.*?)</{0}>", regex::escape(tag)))
}

pub fn parse_feed(xml: &str, format: FeedFormat) -> Result<Vec<FeedItem>, AdapterError> {
    let p = FeedPatterns::get()?;
    let format = match format {
        FeedFormat::Auto if xml.contains("<entry") && !xml.contains("<item") => FeedFormat::Atom,
        FeedFormat::Auto => FeedFormat::Rss,
        explicit => explicit,
    };
    let items = match format {
        FeedFormat::Atom => p
            .blocks(&p.entry, xml)
            .into_iter()
            .map(|block| FeedItem {
                title: p.text(&p.title, block),
                link: p.atom_link(block),
                description: p.first_non_empty(block, &[&p.summary, &p.content]),
                published: p.first_non_empty(block, &[&p.updated, &p.published]),
            })
            .collect(),
        _ => p
            .blocks(&p.item, xml)
            .into_iter()
            .map(|block| FeedItem {
                title: p.text(&p.title, block),
                link: p.text(&p.link, block),
                description: p.first_non_empty(block, &[&p.description, &p.summary]),
                published: p.first_non_empty(block, &[&p.pub_date, &p.dc_date]),
            })
            .collect(),
    };
    Ok(items)
}
