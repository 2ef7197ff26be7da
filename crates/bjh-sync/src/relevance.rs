//! Keyword and salary relevance filter applied to the whole merged set.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use bjh_adapters::classify::contains_any;
use bjh_core::Job;
use serde::{Deserialize, Serialize};

const BUILTIN_RELEVANCE_YAML: &str = include_str!("../../../rules/relevance.yaml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevanceRules {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub disqualifying_title_keywords: Vec<String>,
    #[serde(default)]
    pub domain_keywords: Vec<String>,
    /// Jobs whose `salaryMin` is strictly above this are rejected.
    #[serde(default)]
    pub salary_min_ceiling: Option<u64>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    DisqualifyingTitle(String),
    OffDomain,
    SalaryAboveCeiling(u64),
}

impl RelevanceRules {
    pub fn builtin() -> Result<Self> {
        serde_yaml::from_str(BUILTIN_RELEVANCE_YAML).context("parsing built-in rules/relevance.yaml")
    }

    pub fn load(workspace_root: impl AsRef<Path>) -> Result<Self> {
        let path = workspace_root.as_ref().join("rules/relevance.yaml");
        if !path.exists() {
            return Self::builtin();
        }
        let raw = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Checks run in order and stop at the first failure. Only `title`,
    /// `description` and `salaryMin` are consulted.
    pub fn check(&self, job: &Job) -> Result<(), Rejection> {
        let title = job.title.to_lowercase();
        if let Some(keyword) = self
            .disqualifying_title_keywords
            .iter()
            .find(|k| !k.is_empty() && title.contains(&k.to_lowercase()))
        {
            return Err(Rejection::DisqualifyingTitle(keyword.clone()));
        }

        let description = job.description.to_lowercase();
        if !contains_any(&title, &self.domain_keywords)
            && !contains_any(&description, &self.domain_keywords)
        {
            return Err(Rejection::OffDomain);
        }

        if let (Some(min), Some(ceiling)) = (job.salary_min, self.salary_min_ceiling) {
            if min > ceiling {
                return Err(Rejection::SalaryAboveCeiling(min));
            }
        }
        Ok(())
    }

    pub fn is_relevant(&self, job: &Job) -> bool {
        self.check(job).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::job;

    fn rules() -> RelevanceRules {
        RelevanceRules::builtin().unwrap()
    }

    fn posting(title: &str, description: &str, salary_min: Option<u64>) -> Job {
        let mut j = job("t", title, "Acme Bio", "New York, NY");
        j.description = description.into();
        j.salary_min = salary_min;
        j
    }

    #[test]
    fn seniority_in_title_is_rejected() {
        assert_eq!(
            rules().check(&posting("Senior Scientist", "biology lab", None)),
            Err(Rejection::DisqualifyingTitle("senior".into()))
        );
    }

    #[test]
    fn entry_level_lab_role_within_ceiling_is_kept() {
        assert!(rules().is_relevant(&posting("Lab Technician", "biology lab", Some(50_000))));
        assert_eq!(
            rules().check(&posting("Lab Technician", "biology lab", Some(150_000))),
            Err(Rejection::SalaryAboveCeiling(150_000))
        );
        assert!(rules().is_relevant(&posting("Lab Technician", "biology lab", Some(100_000))));
    }

    #[test]
    fn off_domain_postings_are_rejected() {
        assert_eq!(
            rules().check(&posting("Marketing Coordinator", "social media campaigns", None)),
            Err(Rejection::OffDomain)
        );
        assert!(rules().is_relevant(&posting("Coordinator", "supports our research program", None)));
    }

    #[test]
    fn matching_is_substring_and_case_insensitive() {
        // "Leadership" trips the "lead" keyword; there is no word-boundary check.
        assert!(!rules().is_relevant(&posting("Research LEADERSHIP Program", "lab", None)));
        assert!(rules().is_relevant(&posting("BIOLOGY Aide", "", None)));
    }

    #[test]
    fn verdict_ignores_fields_other_than_title_description_and_salary() {
        let a = posting("Lab Technician", "biology lab", Some(50_000));
        let mut b = a.clone();
        b.company = "Completely Different".into();
        b.location = "Boston, MA".into();
        b.link = "https://example.org".into();
        assert_eq!(rules().check(&a), rules().check(&b));
    }
}
