//! Unified collector.
//!
//! Picks the RSS or web path from the source type, turns whatever was found
//! into candidate articles, and inserts the ones whose link is neither stored
//! nor on the filtered denylist. Collection only ever adds rows.

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::config::ExtractorConfig;
use crate::error::Result;
use crate::extractor;
use crate::feed::{parse_feed, sanitize_xml};
use crate::http::{FetchProfiles, Fetcher};
use crate::models::{Article, CollectedArticle, NewArticle, Source, SourceType};
use crate::store::NewsStore;
use crate::testers::UNTITLED;

/// Per-source outcome of a collection run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionReport {
    pub source: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub count: usize,
    #[serde(skip)]
    pub article_ids: Vec<String>,
}

pub struct Collector {
    store: Arc<dyn NewsStore>,
    fetcher: Arc<dyn Fetcher>,
    profiles: FetchProfiles,
    extractor: ExtractorConfig,
}

impl Collector {
    pub fn new(
        store: Arc<dyn NewsStore>,
        fetcher: Arc<dyn Fetcher>,
        profiles: FetchProfiles,
        extractor: ExtractorConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            profiles,
            extractor,
        }
    }

    /// Collect one source and return the articles that were newly created.
    ///
    /// Network, parse and store errors are logged and yield an empty list so a
    /// broken source never affects its siblings.
    #[instrument(level = "info", skip_all, fields(source = %source.name, kind = %source.source_type))]
    pub async fn collect_from_source(&self, source: &Source) -> Vec<Article> {
        let candidates = match source.source_type {
            SourceType::Rss => self.feed_candidates(&source.url).await,
            SourceType::Web => self.page_candidates(source).await,
        };
        let candidates = match candidates {
            Ok(c) => c,
            Err(e) => {
                error!(url = %source.url, error = %e, "Collection failed");
                return Vec::new();
            }
        };
        if candidates.is_empty() {
            info!("Nothing extracted");
            return Vec::new();
        }

        match self.insert_new(source, candidates).await {
            Ok(created) => {
                info!(count = created.len(), "Collection finished");
                created
            }
            Err(e) => {
                error!(error = %e, "Storing collected articles failed");
                Vec::new()
            }
        }
    }

    /// Collect every collectable source concurrently, stamping `last_fetched`
    /// on each one afterwards.
    #[instrument(level = "info", skip_all)]
    pub async fn collect_all_active_sources(&self) -> Result<Vec<CollectionReport>> {
        let sources = self.store.collectable_sources().await?;
        info!(count = sources.len(), "Collecting active sources");

        let reports = join_all(sources.iter().map(|source| async move {
            let created = self.collect_from_source(source).await;
            if let Err(e) = self.store.touch_last_fetched(&source.id, Utc::now()).await {
                error!(source = %source.name, error = %e, "Failed to update last_fetched");
            }
            CollectionReport {
                source: source.name.clone(),
                source_type: source.source_type,
                count: created.len(),
                article_ids: created.into_iter().map(|a| a.id).collect(),
            }
        }))
        .await;

        let total: usize = reports.iter().map(|r| r.count).sum();
        info!(sources = reports.len(), new_articles = total, "Collection run finished");
        Ok(reports)
    }

    async fn feed_candidates(&self, url: &str) -> Result<Vec<CollectedArticle>> {
        let body = self
            .fetcher
            .get(url, &self.profiles.rss_collect())
            .await?
            .into_body(url)?;
        let feed = parse_feed(&sanitize_xml(&body))?;
        let now = Utc::now();
        Ok(feed
            .items
            .into_iter()
            .take(self.extractor.max_feed_items)
            .filter_map(|item| {
                let link = item.link.filter(|l| !l.is_empty())?;
                Some(CollectedArticle {
                    title: item
                        .title
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| UNTITLED.to_string()),
                    link,
                    pub_date: item.pub_date.unwrap_or(now),
                    image_url: item.image_url,
                    description: None,
                    extract_strategy: None,
                })
            })
            .collect())
    }

    async fn page_candidates(&self, source: &Source) -> Result<Vec<CollectedArticle>> {
        let html = self
            .fetcher
            .get(&source.url, &self.profiles.web_collect())
            .await?
            .into_body(&source.url)?;
        let mut articles = extractor::extract(
            &html,
            &source.url,
            source.scrape_config.as_ref(),
            &self.extractor,
        )?;
        articles.truncate(self.extractor.max_articles);
        Ok(articles)
    }

    async fn insert_new(
        &self,
        source: &Source,
        candidates: Vec<CollectedArticle>,
    ) -> Result<Vec<Article>> {
        let links: Vec<String> = candidates.iter().map(|c| c.link.clone()).collect();
        let existing = self.store.existing_article_links(&links).await?;
        let filtered = self.store.filtered_links(&links).await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut batch = Vec::new();
        for candidate in candidates {
            if existing.contains(&candidate.link) || !seen.insert(candidate.link.clone()) {
                continue;
            }
            if filtered.contains(&candidate.link) {
                debug!(link = %candidate.link, "Skipping previously filtered link");
                continue;
            }
            batch.push(NewArticle {
                link: candidate.link,
                title: candidate.title,
                pub_date: candidate.pub_date,
                source: source.name.clone(),
                category: source.category.clone(),
                image_url: candidate.image_url,
            });
        }
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        self.store.create_articles(batch).await
    }
}
