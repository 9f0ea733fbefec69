//! Domain models shared by the collection, filtering and trending stages.
//!
//! This module defines the persistent entities and the transient results
//! produced while onboarding sources:
//! - [`Article`] / [`NewArticle`]: collected items, unique by `link`
//! - [`FilteredArticle`]: history of rejected links that must never come back
//! - [`Source`]: an RSS feed or web page definition with its validation state
//! - [`HotTopic`]: a ranked cluster for one [`HotTopicWindow`]
//! - [`CollectedArticle`] / [`TestResult`] / [`DetectResult`]: ephemeral output
//!
//! Field names serialize in camelCase so stored `testResult` snapshots and CLI
//! output keep the same shape operators already know.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A collected news item.
///
/// Created by the collector on first sight of a `link`, retitled by the
/// translation stage, deleted by the relevance filter or by retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    /// Globally unique; the primary dedup key.
    pub link: String,
    pub title: String,
    pub title_original: String,
    pub description: Option<String>,
    pub description_original: Option<String>,
    pub content: Option<String>,
    pub content_original: Option<String>,
    pub pub_date: DateTime<Utc>,
    /// Display name of the source that produced the article.
    pub source: String,
    pub category: String,
    pub image_url: Option<String>,
    pub is_translated: bool,
    pub created_at: DateTime<Utc>,
}

impl Article {
    /// The title shown to downstream stages: the translated title once
    /// translation ran, the original otherwise.
    pub fn display_title(&self) -> &str {
        if self.is_translated || self.title_original.is_empty() {
            &self.title
        } else {
            &self.title_original
        }
    }
}

/// Insert payload for an [`Article`]. Enrichment fields start empty.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub link: String,
    pub title: String,
    pub pub_date: DateTime<Utc>,
    pub source: String,
    pub category: String,
    pub image_url: Option<String>,
}

/// A link rejected by the relevance filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteredArticle {
    pub link: String,
    pub title: String,
    pub source: String,
    pub reason: String,
    pub filtered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Rss,
    Web,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::Rss => write!(f, "rss"),
            SourceType::Web => write!(f, "web"),
        }
    }
}

impl FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rss" => Ok(SourceType::Rss),
            "web" => Ok(SourceType::Web),
            other => Err(Error::Config(format!(
                "source type must be \"rss\" or \"web\", got \"{other}\""
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pending,
    Success,
    Failed,
}

/// URL substring filters applied to extracted links.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrapeConfig {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl ScrapeConfig {
    /// Exclude wins over include; an empty include list does not restrict.
    pub fn allows(&self, link: &str) -> bool {
        if self
            .exclude_patterns
            .iter()
            .any(|p| !p.is_empty() && link.contains(p.as_str()))
        {
            return false;
        }
        let includes: Vec<&String> = self
            .include_patterns
            .iter()
            .filter(|p| !p.is_empty())
            .collect();
        includes.is_empty() || includes.iter().any(|p| link.contains(p.as_str()))
    }
}

/// A configured origin the collector polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub url: String,
    pub name: String,
    pub category: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub is_active: bool,
    pub is_tested: bool,
    pub test_status: TestStatus,
    pub test_result: Option<serde_json::Value>,
    pub scrape_config: Option<ScrapeConfig>,
    pub last_tested: Option<DateTime<Utc>>,
    pub last_fetched: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Source {
    /// Whether the collector should poll this source.
    pub fn is_collectable(&self) -> bool {
        self.is_active && self.is_tested && self.test_status == TestStatus::Success
    }

    /// Toggle activation. Activation requires a successful test; the source is
    /// left untouched when the request is rejected.
    pub fn set_active(&mut self, active: bool) -> Result<()> {
        if active && !self.is_tested {
            return Err(Error::Invariant(
                "Cannot activate source that has not been tested successfully".into(),
            ));
        }
        if active && self.test_status != TestStatus::Success {
            return Err(Error::Invariant(
                "Cannot activate source with failed or pending test".into(),
            ));
        }
        self.is_active = active;
        Ok(())
    }

    /// Drop any prior validation. Used whenever the collection setup changes.
    pub fn invalidate_test(&mut self) {
        self.is_tested = false;
        self.test_status = TestStatus::Pending;
        self.test_result = None;
        self.last_tested = None;
        self.is_active = false;
    }
}

/// Insert payload for a [`Source`]. New sources start untested and inactive.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSource {
    pub url: String,
    pub name: String,
    pub category: String,
    pub source_type: SourceType,
    pub scrape_config: Option<ScrapeConfig>,
}

/// A partial edit of a [`Source`]. `None` leaves the field unchanged;
/// `scrape_config: Some(None)` clears the config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub source_type: Option<SourceType>,
    pub scrape_config: Option<Option<ScrapeConfig>>,
}

impl SourceUpdate {
    /// Edits to the collection setup invalidate the previous test.
    pub fn touches_collection_setup(&self) -> bool {
        self.url.is_some() || self.source_type.is_some() || self.scrape_config.is_some()
    }

    pub fn apply(self, source: &mut Source) {
        let invalidates = self.touches_collection_setup();
        if let Some(name) = self.name {
            source.name = name;
        }
        if let Some(url) = self.url {
            source.url = url;
        }
        if let Some(category) = self.category {
            source.category = category;
        }
        if let Some(source_type) = self.source_type {
            source.source_type = source_type;
        }
        if let Some(scrape_config) = self.scrape_config {
            source.scrape_config = scrape_config;
        }
        if invalidates {
            source.invalidate_test();
        }
    }
}

/// Outcome of a source test, written back in one update.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTestRecord {
    pub success: bool,
    pub collection_url: String,
    pub source_type: SourceType,
    pub test_result: serde_json::Value,
    pub tested_at: DateTime<Utc>,
}

impl SourceTestRecord {
    pub fn apply(self, source: &mut Source) {
        source.is_tested = true;
        source.test_result = Some(self.test_result);
        source.last_tested = Some(self.tested_at);
        if self.success {
            source.url = self.collection_url;
            source.source_type = self.source_type;
            source.test_status = TestStatus::Success;
        } else {
            source.test_status = TestStatus::Failed;
            source.is_active = false;
        }
    }
}

/// Rolling window a hot topic list was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HotTopicWindow {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "48h")]
    TwoDays,
}

impl HotTopicWindow {
    pub fn hours(self) -> i64 {
        match self {
            HotTopicWindow::Day => 24,
            HotTopicWindow::TwoDays => 48,
        }
    }
}

impl fmt::Display for HotTopicWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h", self.hours())
    }
}

impl FromStr for HotTopicWindow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "24h" | "24" => Ok(HotTopicWindow::Day),
            "48h" | "48" => Ok(HotTopicWindow::TwoDays),
            other => Err(Error::Config(format!(
                "window must be \"24h\" or \"48h\", got \"{other}\""
            ))),
        }
    }
}

/// A persisted hot topic row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotTopic {
    pub id: String,
    #[serde(rename = "type")]
    pub window: HotTopicWindow,
    pub title: String,
    pub discussion_count: usize,
    pub sources: Vec<String>,
    pub article_ids: Vec<String>,
    pub score: u32,
    pub created_at: DateTime<Utc>,
}

/// Which extraction heuristic produced a [`CollectedArticle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractStrategy {
    HeadingLink,
    HeadingLinkReverse,
    GenericLink,
    ArticleContainer,
}

/// A candidate article pulled from a feed or a page, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedArticle {
    pub title: String,
    pub link: String,
    pub pub_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract_strategy: Option<ExtractStrategy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateExtractionStats {
    pub total: usize,
    pub with_real_date: usize,
    pub failed_count: usize,
}

/// Result of a non-persisting collection test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub success: bool,
    pub articles: Vec<CollectedArticle>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub date_extraction_failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_extraction_stats: Option<DateExtractionStats>,
}

impl TestResult {
    pub fn succeeded(articles: Vec<CollectedArticle>) -> Self {
        Self {
            success: true,
            count: articles.len(),
            articles,
            error: None,
            timestamp: Utc::now(),
            date_extraction_failed: false,
            date_extraction_stats: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            articles: Vec::new(),
            count: 0,
            error: Some(error.into()),
            timestamp: Utc::now(),
            date_extraction_failed: false,
            date_extraction_stats: None,
        }
    }
}

/// Outcome of source type detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectResult {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rss_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
