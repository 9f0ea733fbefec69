//! Dry-run collection used while onboarding a source.
//!
//! Both testers are total: every failure (network, HTTP status, malformed
//! feed, nothing extracted, unusable dates) comes back as a [`TestResult`]
//! with `success: false` and a readable `error`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::{DateGateConfig, ExtractorConfig};
use crate::error::Result;
use crate::extractor;
use crate::feed::{parse_feed, sanitize_xml};
use crate::http::{FetchProfiles, Fetcher};
use crate::models::{CollectedArticle, DateExtractionStats, ScrapeConfig, TestResult};

pub const UNTITLED: &str = "Untitled";

pub struct Testers {
    fetcher: Arc<dyn Fetcher>,
    profiles: FetchProfiles,
    extractor: ExtractorConfig,
    gate: DateGateConfig,
}

impl Testers {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        profiles: FetchProfiles,
        extractor: ExtractorConfig,
        gate: DateGateConfig,
    ) -> Self {
        Self {
            fetcher,
            profiles,
            extractor,
            gate,
        }
    }

    /// Fetch and parse a feed, returning up to `preview_limit` items.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn test_rss_feed(&self, url: &str) -> TestResult {
        match self.preview_feed(url).await {
            Ok(articles) if articles.is_empty() => {
                warn!("Feed parsed but has no usable items");
                TestResult::failed("Feed contains no items with links")
            }
            Ok(articles) => {
                info!(count = articles.len(), "Feed test succeeded");
                TestResult::succeeded(articles)
            }
            Err(e) => {
                warn!(error = %e, "Feed test failed");
                TestResult::failed(e.to_string())
            }
        }
    }

    async fn preview_feed(&self, url: &str) -> Result<Vec<CollectedArticle>> {
        let body = self
            .fetcher
            .get(url, &self.profiles.rss_test())
            .await?
            .into_body(url)?;
        let feed = parse_feed(&sanitize_xml(&body))?;
        let now = Utc::now();
        Ok(feed
            .items
            .into_iter()
            .take(self.extractor.preview_limit)
            .filter_map(|item| {
                let link = item.link.filter(|l| !l.is_empty())?;
                Some(CollectedArticle {
                    title: item.title.unwrap_or_else(|| UNTITLED.to_string()),
                    link,
                    pub_date: item.pub_date.unwrap_or(now),
                    image_url: item.image_url,
                    description: item.description,
                    extract_strategy: None,
                })
            })
            .collect())
    }

    /// Fetch a page with a browser user agent, run the extractor, apply
    /// `filters`, keep `preview_limit` results and run the date-quality gate.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn test_web_scrape(&self, url: &str, filters: Option<&ScrapeConfig>) -> TestResult {
        let started = Utc::now();
        let articles = match self.scrape(url, filters).await {
            Ok(articles) => articles,
            Err(e) => {
                warn!(error = %e, "Web scrape test failed");
                return TestResult::failed(e.to_string());
            }
        };
        let result = apply_date_gate(articles, started, &self.gate);
        info!(
            success = result.success,
            count = result.count,
            date_failed = result.date_extraction_failed,
            "Web scrape test finished"
        );
        result
    }

    async fn scrape(
        &self,
        url: &str,
        filters: Option<&ScrapeConfig>,
    ) -> Result<Vec<CollectedArticle>> {
        let html = self
            .fetcher
            .get(url, &self.profiles.web_test())
            .await?
            .into_body(url)?;
        let mut articles = extractor::extract(&html, url, filters, &self.extractor)?;
        articles.truncate(self.extractor.preview_limit);
        Ok(articles)
    }
}

/// Judge whether scraped dates are real.
///
/// A `pub_date` at or after `started - fallback_window` is taken to be the
/// substituted "now" rather than a recovered date. Too many of those and the
/// test fails, since recency ranking downstream would be meaningless.
pub fn apply_date_gate(
    articles: Vec<CollectedArticle>,
    started: DateTime<Utc>,
    gate: &DateGateConfig,
) -> TestResult {
    if articles.is_empty() {
        return TestResult::failed(
            "No articles could be extracted from the page. Use an RSS feed or adjust the include/exclude patterns.",
        );
    }

    let cutoff = started - ChronoDuration::seconds(gate.fallback_window_secs);
    let total = articles.len();
    let failed_count = articles.iter().filter(|a| a.pub_date >= cutoff).count();
    let ratio = failed_count as f64 / total as f64;
    let stats = DateExtractionStats {
        total,
        with_real_date: total - failed_count,
        failed_count,
    };

    let mut result = TestResult::succeeded(articles);
    result.date_extraction_stats = Some(stats);
    if ratio > gate.max_fallback_ratio {
        result.success = false;
        result.date_extraction_failed = true;
        result.error = Some(format!(
            "Could not extract publication dates: {failed_count} of {total} articles ({:.0}%) have no real date, above the {:.0}% limit. Prefer the site's RSS feed or pick a source that labels its dates.",
            ratio * 100.0,
            gate.max_fallback_ratio * 100.0
        ));
    }
    result
}
