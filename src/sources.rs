//! Source management.
//!
//! Sources are created untested and inactive. A test run tries the cheapest
//! collection path that works (a feed, then the page itself), rewrites the
//! source to what worked and only then allows activation.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use url::Url;

use crate::detector::Detector;
use crate::error::{Error, Result};
use crate::models::{
    NewSource, ScrapeConfig, Source, SourceTestRecord, SourceType, SourceUpdate, TestResult,
};
use crate::store::NewsStore;
use crate::testers::Testers;

/// Which sources `list_sources` returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SourceFilter {
    #[default]
    All,
    Active,
    Tested,
    Untested,
}

impl SourceFilter {
    fn keeps(self, source: &Source) -> bool {
        match self {
            SourceFilter::All => true,
            SourceFilter::Active => source.is_active,
            SourceFilter::Tested => source.is_tested,
            SourceFilter::Untested => !source.is_tested,
        }
    }
}

impl FromStr for SourceFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(SourceFilter::All),
            "active" => Ok(SourceFilter::Active),
            "tested" => Ok(SourceFilter::Tested),
            "untested" => Ok(SourceFilter::Untested),
            other => Err(Error::Config(format!("unknown source filter: {other}"))),
        }
    }
}

/// Result of [`SourceService::test_source`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceTestOutcome {
    pub success: bool,
    pub source: Source,
    pub test_result: TestResult,
    pub attempt_log: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a run of attempts settled on.
struct Attempt {
    result: TestResult,
    source_type: SourceType,
    collection_url: String,
}

/// URL already points at something feed-shaped.
fn looks_like_feed_path(url: &str) -> bool {
    url.contains("/feed") || url.contains(".xml") || url.contains(".rss")
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{field} is required")));
    }
    Ok(())
}

pub struct SourceService {
    store: Arc<dyn NewsStore>,
    detector: Arc<Detector>,
    testers: Arc<Testers>,
}

impl SourceService {
    pub fn new(store: Arc<dyn NewsStore>, detector: Arc<Detector>, testers: Arc<Testers>) -> Self {
        Self {
            store,
            detector,
            testers,
        }
    }

    /// Register a source. It starts untested and inactive.
    #[instrument(level = "info", skip_all, fields(url = %new.url))]
    pub async fn create_source(&self, new: NewSource) -> Result<Source> {
        require("name", &new.name)?;
        require("url", &new.url)?;
        require("category", &new.category)?;
        Url::parse(&new.url)?;

        let source = self.store.create_source(new).await?;
        info!(id = %source.id, name = %source.name, "Source created");
        Ok(source)
    }

    /// Edit a source. Changing the url, type or scrape config resets its
    /// test and deactivates it.
    #[instrument(level = "info", skip_all, fields(%id))]
    pub async fn update_source(&self, id: &str, update: SourceUpdate) -> Result<Source> {
        if let Some(url) = &update.url {
            Url::parse(url)?;
        }
        if let Some(name) = &update.name {
            require("name", name)?;
        }
        let resets = update.touches_collection_setup();
        let source = self.store.update_source(id, update).await?;
        info!(reset = resets, "Source updated");
        Ok(source)
    }

    pub async fn delete_source(&self, id: &str) -> Result<()> {
        self.store.delete_source(id).await?;
        info!(%id, "Source deleted");
        Ok(())
    }

    /// Sources matching `filter`, newest first.
    pub async fn list_sources(&self, filter: SourceFilter) -> Result<Vec<Source>> {
        let mut sources: Vec<Source> = self
            .store
            .list_sources()
            .await?
            .into_iter()
            .filter(|s| filter.keeps(s))
            .collect();
        sources.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sources)
    }

    /// Activate or deactivate. Activation needs a successful test.
    #[instrument(level = "info", skip_all, fields(%id, active))]
    pub async fn set_active(&self, id: &str, active: bool) -> Result<Source> {
        let source = self.store.set_source_active(id, active).await?;
        info!(name = %source.name, "Source activation changed");
        Ok(source)
    }

    /// Run a tester without touching the store.
    pub async fn probe(
        &self,
        url: &str,
        source_type: SourceType,
        config: Option<&ScrapeConfig>,
    ) -> Result<TestResult> {
        Url::parse(url)?;
        Ok(match source_type {
            SourceType::Rss => self.testers.test_rss_feed(url).await,
            SourceType::Web => self.testers.test_web_scrape(url, config).await,
        })
    }

    /// Find a working collection path for the source and record the outcome.
    ///
    /// On success the source's url and type become whatever worked. A
    /// collection url already owned by another source counts as a failure.
    #[instrument(level = "info", skip_all, fields(%id))]
    pub async fn test_source(&self, id: &str) -> Result<SourceTestOutcome> {
        let source = self.store.get_source(id).await?;
        let mut log = Vec::new();
        let mut attempt = self.attempt(&source, &mut log).await;

        if attempt.result.success && attempt.collection_url != source.url {
            if let Some(owner) = self.store.find_source_by_url(&attempt.collection_url).await? {
                if owner.id != source.id {
                    let message = format!(
                        "collection URL {} already belongs to source \"{}\"",
                        attempt.collection_url, owner.name
                    );
                    warn!(owner = %owner.name, "Collection URL conflict");
                    log.push(format!("Conflict: {message}"));
                    attempt.result.success = false;
                    attempt.result.error = Some(message);
                }
            }
        }

        let record = SourceTestRecord {
            success: attempt.result.success,
            collection_url: attempt.collection_url.clone(),
            source_type: attempt.source_type,
            test_result: result_json(&attempt, source.source_type, &log)?,
            tested_at: Utc::now(),
        };
        let updated = match self.store.record_source_test(id, record.clone()).await {
            Err(e) if e.is_duplicate() => {
                let message = format!(
                    "collection URL {} already belongs to another source",
                    attempt.collection_url
                );
                log.push(format!("Conflict: {message}"));
                attempt.result.success = false;
                attempt.result.error = Some(message);
                let failed = SourceTestRecord {
                    success: false,
                    test_result: result_json(&attempt, source.source_type, &log)?,
                    ..record
                };
                self.store.record_source_test(id, failed).await?
            }
            other => other?,
        };

        info!(
            success = attempt.result.success,
            source_type = %updated.source_type,
            url = %updated.url,
            "Source test recorded"
        );
        Ok(SourceTestOutcome {
            success: attempt.result.success,
            error: attempt.result.error.clone(),
            source: updated,
            test_result: attempt.result,
            attempt_log: log,
        })
    }

    async fn attempt(&self, source: &Source, log: &mut Vec<String>) -> Attempt {
        let config = source.scrape_config.as_ref();
        match source.source_type {
            SourceType::Rss => {
                log.push("Trying RSS collection".into());
                let mut feed_url = source.url.clone();
                if !looks_like_feed_path(&source.url) {
                    log.push("Looking for feed links in the page".into());
                    match self.detector.find_feeds_in_page(&source.url).await.into_iter().next() {
                        Some(found) => {
                            log.push(format!("Found feed: {found}"));
                            feed_url = found;
                        }
                        None => log.push("No feed link found, parsing the URL directly".into()),
                    }
                }

                let rss = self.testers.test_rss_feed(&feed_url).await;
                if rss.success {
                    log.push(format!("RSS collection succeeded with {} articles", rss.count));
                    return Attempt {
                        result: rss,
                        source_type: SourceType::Rss,
                        collection_url: feed_url,
                    };
                }
                log.push(format!("RSS collection failed: {}", error_text(&rss)));

                log.push("Falling back to web scraping".into());
                let web = self.testers.test_web_scrape(&source.url, config).await;
                if web.success {
                    log.push(format!("Web scraping succeeded with {} articles", web.count));
                    Attempt {
                        result: web,
                        source_type: SourceType::Web,
                        collection_url: source.url.clone(),
                    }
                } else {
                    log.push(format!("Web scraping failed: {}", error_text(&web)));
                    Attempt {
                        result: web,
                        source_type: SourceType::Rss,
                        collection_url: source.url.clone(),
                    }
                }
            }
            SourceType::Web => {
                log.push("Looking for a feed before scraping".into());
                if let Some(found) = self.detector.find_feeds_in_page(&source.url).await.into_iter().next() {
                    log.push(format!("Found feed: {found}"));
                    let rss = self.testers.test_rss_feed(&found).await;
                    if rss.success {
                        log.push(format!("RSS collection succeeded with {} articles", rss.count));
                        return Attempt {
                            result: rss,
                            source_type: SourceType::Rss,
                            collection_url: found,
                        };
                    }
                    log.push(format!("RSS collection failed: {}", error_text(&rss)));
                } else {
                    log.push("No feed found".into());
                }

                log.push("Trying web scraping".into());
                let web = self.testers.test_web_scrape(&source.url, config).await;
                if web.success {
                    log.push(format!("Web scraping succeeded with {} articles", web.count));
                } else {
                    log.push(format!("Web scraping failed: {}", error_text(&web)));
                }
                Attempt {
                    result: web,
                    source_type: SourceType::Web,
                    collection_url: source.url.clone(),
                }
            }
        }
    }
}

fn error_text(result: &TestResult) -> &str {
    result.error.as_deref().unwrap_or("unknown error")
}

/// The stored `testResult`: the tester output plus how it was reached.
fn result_json(attempt: &Attempt, original: SourceType, log: &[String]) -> Result<Value> {
    let mut value = serde_json::to_value(&attempt.result)?;
    if let Value::Object(map) = &mut value {
        map.insert("attemptLog".into(), serde_json::to_value(log)?);
        map.insert("detectedType".into(), Value::String(attempt.source_type.to_string()));
        map.insert("originalType".into(), Value::String(original.to_string()));
        map.insert("collectionUrl".into(), Value::String(attempt.collection_url.clone()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DateGateConfig, ExtractorConfig};
    use crate::http::FetchProfiles;
    use crate::models::TestStatus;
    use crate::store::MemoryStore;
    use crate::test_support::StubFetcher;

    const FEED: &str = "<rss><channel><item><title>Kernel 7.0 lands</title><link>https://site.example/k7</link></item></channel></rss>";
    const PAGE_WITH_FEED: &str = r#"<html><head><link rel="alternate" type="application/rss+xml" href="/rss.xml"></head><body></body></html>"#;

    fn dated_page() -> String {
        (1..=12)
            .map(|i| {
                format!(
                    r#"<a href="/p/{i}"><div><h3>Dated story number {i}</h3><time datetime="2025-01-{i:02}T09:00:00Z"></time></div></a>"#
                )
            })
            .collect()
    }

    fn service(store: &MemoryStore, fetcher: StubFetcher) -> SourceService {
        let fetcher = Arc::new(fetcher);
        let profiles = FetchProfiles::default();
        SourceService::new(
            Arc::new(store.clone()),
            Arc::new(Detector::new(fetcher.clone(), None, profiles.clone())),
            Arc::new(Testers::new(
                fetcher,
                profiles,
                ExtractorConfig::default(),
                DateGateConfig::default(),
            )),
        )
    }

    fn new_source(url: &str, source_type: SourceType) -> NewSource {
        NewSource {
            url: url.into(),
            name: format!("Source at {url}"),
            category: "tech".into(),
            source_type,
            scrape_config: None,
        }
    }

    #[tokio::test]
    async fn create_validates_input() {
        let store = MemoryStore::new();
        let svc = service(&store, StubFetcher::new());

        assert!(matches!(
            svc.create_source(new_source("not a url", SourceType::Rss)).await,
            Err(Error::InvalidUrl(_))
        ));
        let mut blank = new_source("https://site.example/", SourceType::Web);
        blank.name = "  ".into();
        assert!(matches!(svc.create_source(blank).await, Err(Error::Config(_))));

        let created = svc
            .create_source(new_source("https://site.example/", SourceType::Web))
            .await
            .unwrap();
        assert!(!created.is_active);
        assert!(!created.is_tested);
        assert_eq!(created.test_status, TestStatus::Pending);
        assert!(svc
            .create_source(new_source("https://site.example/", SourceType::Web))
            .await
            .unwrap_err()
            .is_duplicate());
    }

    #[tokio::test]
    async fn rss_source_switches_to_advertised_feed() {
        let store = MemoryStore::new();
        let svc = service(
            &store,
            StubFetcher::new()
                .with_page("https://site.example/", 200, PAGE_WITH_FEED)
                .with_page("https://site.example/rss.xml", 200, FEED),
        );
        let src = svc
            .create_source(new_source("https://site.example/", SourceType::Rss))
            .await
            .unwrap();

        let out = svc.test_source(&src.id).await.unwrap();
        assert!(out.success, "{:?}", out.attempt_log);
        assert_eq!(out.source.url, "https://site.example/rss.xml");
        assert_eq!(out.source.source_type, SourceType::Rss);
        assert_eq!(out.source.test_status, TestStatus::Success);
        assert!(out.source.last_tested.is_some());

        let stored = out.source.test_result.unwrap();
        assert_eq!(stored["collectionUrl"], "https://site.example/rss.xml");
        assert_eq!(stored["detectedType"], "rss");
        assert_eq!(stored["originalType"], "rss");
        assert!(stored["attemptLog"].as_array().unwrap().len() >= 3);

        let activated = svc.set_active(&src.id, true).await.unwrap();
        assert!(activated.is_active);
    }

    #[tokio::test]
    async fn rss_source_falls_back_to_web() {
        let store = MemoryStore::new();
        let page = dated_page();
        let svc = service(
            &store,
            StubFetcher::new().with_page("https://news.example/", 200, &page),
        );
        let src = svc
            .create_source(new_source("https://news.example/", SourceType::Rss))
            .await
            .unwrap();

        let out = svc.test_source(&src.id).await.unwrap();
        assert!(out.success, "{:?}", out.attempt_log);
        assert_eq!(out.source.source_type, SourceType::Web);
        assert_eq!(out.source.url, "https://news.example/");
        assert!(out.attempt_log.iter().any(|l| l.contains("Falling back")));
    }

    #[tokio::test]
    async fn web_source_prefers_feed() {
        let store = MemoryStore::new();
        let svc = service(
            &store,
            StubFetcher::new()
                .with_page("https://site.example/", 200, PAGE_WITH_FEED)
                .with_page("https://site.example/rss.xml", 200, FEED),
        );
        let src = svc
            .create_source(new_source("https://site.example/", SourceType::Web))
            .await
            .unwrap();

        let out = svc.test_source(&src.id).await.unwrap();
        assert!(out.success);
        assert_eq!(out.source.source_type, SourceType::Rss);
        assert_eq!(
            out.source.test_result.unwrap()["originalType"],
            "web"
        );
    }

    #[tokio::test]
    async fn failed_test_marks_source_and_blocks_activation() {
        let store = MemoryStore::new();
        let svc = service(
            &store,
            StubFetcher::new().with_page("https://dead.example/", 503, ""),
        );
        let src = svc
            .create_source(new_source("https://dead.example/", SourceType::Web))
            .await
            .unwrap();

        let out = svc.test_source(&src.id).await.unwrap();
        assert!(!out.success);
        assert!(out.error.is_some());
        assert!(out.source.is_tested);
        assert_eq!(out.source.test_status, TestStatus::Failed);
        assert!(!out.source.is_active);
        assert!(out.source.test_result.unwrap()["attemptLog"].is_array());

        assert!(matches!(
            svc.set_active(&src.id, true).await,
            Err(Error::Invariant(_))
        ));
    }

    #[tokio::test]
    async fn collection_url_owned_elsewhere_fails_the_test() {
        let store = MemoryStore::new();
        let svc = service(
            &store,
            StubFetcher::new()
                .with_page("https://site.example/", 200, PAGE_WITH_FEED)
                .with_page("https://site.example/rss.xml", 200, FEED),
        );
        svc.create_source(new_source("https://site.example/rss.xml", SourceType::Rss))
            .await
            .unwrap();
        let src = svc
            .create_source(new_source("https://site.example/", SourceType::Web))
            .await
            .unwrap();

        let out = svc.test_source(&src.id).await.unwrap();
        assert!(!out.success);
        assert!(out.error.unwrap().contains("already belongs"));
        assert_eq!(out.source.url, "https://site.example/");
        assert_eq!(out.source.test_status, TestStatus::Failed);
    }

    #[tokio::test]
    async fn update_resets_test_and_list_filters() {
        let store = MemoryStore::new();
        let svc = service(
            &store,
            StubFetcher::new().with_page("https://site.example/feed", 200, FEED),
        );
        let src = svc
            .create_source(new_source("https://site.example/feed", SourceType::Rss))
            .await
            .unwrap();
        svc.test_source(&src.id).await.unwrap();
        svc.set_active(&src.id, true).await.unwrap();
        assert_eq!(svc.list_sources(SourceFilter::Active).await.unwrap().len(), 1);

        let renamed = svc
            .update_source(
                &src.id,
                SourceUpdate {
                    name: Some("Renamed".into()),
                    ..SourceUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(renamed.is_active);

        assert!(matches!(
            svc.update_source(
                &src.id,
                SourceUpdate {
                    url: Some("::bad".into()),
                    ..SourceUpdate::default()
                }
            )
            .await,
            Err(Error::InvalidUrl(_))
        ));

        let moved = svc
            .update_source(
                &src.id,
                SourceUpdate {
                    url: Some("https://site.example/other.xml".into()),
                    ..SourceUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(!moved.is_active);
        assert!(!moved.is_tested);
        assert_eq!(svc.list_sources(SourceFilter::Untested).await.unwrap().len(), 1);
        assert!(svc.list_sources(SourceFilter::Tested).await.unwrap().is_empty());

        svc.delete_source(&src.id).await.unwrap();
        assert!(matches!(svc.delete_source(&src.id).await, Err(Error::NotFound(_))));
    }

    #[test]
    fn filter_names_parse() {
        assert_eq!("untested".parse::<SourceFilter>().unwrap(), SourceFilter::Untested);
        assert!("weird".parse::<SourceFilter>().is_err());
    }
}
