//! Keyword rule tables that derive category, employer type, region and job
//! type for a normalized posting.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const BUILTIN_CLASSIFY_YAML: &str = include_str!("../../../rules/classify.yaml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRule {
    pub tag: String,
    pub contains_any: Vec<String>,
}

/// Ordered keyword table: the first rule with a matching keyword wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTable {
    pub default: String,
    #[serde(default)]
    pub rules: Vec<TagRule>,
}

impl RuleTable {
    pub fn classify(&self, text: &str) -> &str {
        let lower = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| contains_any(&lower, &rule.contains_any))
            .map(|rule| rule.tag.as_str())
            .unwrap_or(&self.default)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRules {
    pub version: u32,
    pub category: RuleTable,
    pub employer_type: RuleTable,
    pub region: RuleTable,
    pub job_type: RuleTable,
}

impl ClassificationRules {
    pub fn builtin() -> Result<Self> {
        serde_yaml::from_str(BUILTIN_CLASSIFY_YAML).context("parsing built-in rules/classify.yaml")
    }

    /// Reads `rules/classify.yaml` under the workspace root, or the built-in
    /// tables when that file does not exist.
    pub fn load(workspace_root: impl AsRef<Path>) -> Result<Self> {
        let path = workspace_root.as_ref().join("rules/classify.yaml");
        if !path.exists() {
            return Self::builtin();
        }
        let raw = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Category is matched against the title and description together.
    pub fn category(&self, title: &str, description: &str) -> &str {
        self.category.classify(&format!("{title} {description}"))
    }

    pub fn employer_type(&self, company: &str) -> &str {
        self.employer_type.classify(company)
    }

    pub fn region(&self, location: &str) -> &str {
        self.region.classify(location)
    }

    pub fn job_type(&self, title: &str) -> &str {
        self.job_type.classify(title)
    }
}

/// Case-insensitive substring test. `haystack_lower` must already be
/// lower-cased; keywords are lower-cased here.
pub fn contains_any(haystack_lower: &str, keywords: &[String]) -> bool {
    keywords
        .iter()
        .any(|k| !k.is_empty() && haystack_lower.contains(&k.to_lowercase()))
}
