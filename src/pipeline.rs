//! The scheduled cycle: retention, collection, filtering, translation and
//! hot topics, in that order. A stage that fails is logged and skipped; the
//! stages after it still run.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

use crate::collector::Collector;
use crate::config::RetentionConfig;
use crate::error::Result;
use crate::filter::{FilterOutcome, RelevanceFilter};
use crate::models::HotTopicWindow;
use crate::store::NewsStore;
use crate::translate::{TitleTranslation, TranslationReport};
use crate::trending::TrendingAnalyzer;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub deleted_articles: usize,
    pub deleted_filtered: usize,
    pub sources_collected: usize,
    pub collected: usize,
    pub filtered: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<TranslationReport>,
    pub hot_topics_48h: usize,
    pub hot_topics_24h: usize,
    /// Stages that errored, by name.
    pub failed_stages: Vec<String>,
    pub duration_secs: f64,
}

pub struct Pipeline {
    store: Arc<dyn NewsStore>,
    collector: Arc<Collector>,
    filter: Arc<RelevanceFilter>,
    translation: Option<Arc<TitleTranslation>>,
    trending: Arc<TrendingAnalyzer>,
    retention: RetentionConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn NewsStore>,
        collector: Arc<Collector>,
        filter: Arc<RelevanceFilter>,
        trending: Arc<TrendingAnalyzer>,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            store,
            collector,
            filter,
            translation: None,
            trending,
            retention,
        }
    }

    pub fn with_translation(mut self, translation: Arc<TitleTranslation>) -> Self {
        self.translation = Some(translation);
        self
    }

    /// Run one full cycle.
    #[instrument(level = "info", skip_all)]
    pub async fn run_cycle(&self) -> CycleSummary {
        let start = Instant::now();
        let mut summary = CycleSummary::default();
        info!("Cycle starting");

        match self.apply_retention().await {
            Ok((articles, filtered)) => {
                summary.deleted_articles = articles;
                summary.deleted_filtered = filtered;
            }
            Err(e) => fail(&mut summary, "retention", &e),
        }

        let mut new_ids = Vec::new();
        match self.collector.collect_all_active_sources().await {
            Ok(reports) => {
                summary.sources_collected = reports.len();
                summary.collected = reports.iter().map(|r| r.count).sum();
                new_ids = reports.into_iter().flat_map(|r| r.article_ids).collect();
            }
            Err(e) => fail(&mut summary, "collect", &e),
        }

        if !new_ids.is_empty() {
            match self.filter.filter_irrelevant_articles(&new_ids).await {
                Ok(outcome) => summary.filtered = outcome.filtered,
                Err(e) => fail(&mut summary, "filter", &e),
            }
        }

        if let Some(translation) = &self.translation {
            match translation.translate_pending().await {
                Ok(report) => summary.translation = Some(report),
                Err(e) => fail(&mut summary, "translate", &e),
            }
        }

        for window in [HotTopicWindow::TwoDays, HotTopicWindow::Day] {
            match self.trending.refresh_hot_topics(window).await {
                Ok(topics) => match window {
                    HotTopicWindow::TwoDays => summary.hot_topics_48h = topics.len(),
                    HotTopicWindow::Day => summary.hot_topics_24h = topics.len(),
                },
                Err(e) => fail(&mut summary, &format!("hot_topics_{window}"), &e),
            }
        }

        summary.duration_secs = start.elapsed().as_secs_f64();
        info!(
            collected = summary.collected,
            filtered = summary.filtered,
            hot_48h = summary.hot_topics_48h,
            hot_24h = summary.hot_topics_24h,
            failed = summary.failed_stages.len(),
            duration_secs = summary.duration_secs,
            "Cycle finished"
        );
        summary
    }

    /// Delete articles and denylist rows older than the retention period.
    async fn apply_retention(&self) -> Result<(usize, usize)> {
        let cutoff = Utc::now() - ChronoDuration::days(self.retention.days);
        let articles = self.store.delete_articles_published_before(cutoff).await?;
        let filtered = self.store.delete_filtered_before(cutoff).await?;
        info!(articles, filtered, days = self.retention.days, "Retention applied");
        Ok((articles, filtered))
    }

    /// Re-run the relevance filter over articles published in the last
    /// `hours` hours.
    #[instrument(level = "info", skip_all, fields(hours))]
    pub async fn filter_recent(&self, hours: i64) -> Result<FilterOutcome> {
        let cutoff = Utc::now() - ChronoDuration::hours(hours);
        let ids: Vec<String> = self
            .store
            .articles_since(cutoff)
            .await?
            .into_iter()
            .map(|a| a.id)
            .collect();
        info!(count = ids.len(), "Filtering recent articles");
        self.filter.filter_irrelevant_articles(&ids).await
    }
}

fn fail(summary: &mut CycleSummary, stage: &str, e: &crate::error::Error) {
    error!(stage, error = %e, "Stage failed; continuing");
    summary.failed_stages.push(stage.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtractorConfig, FilterConfig, TranslationConfig, TrendingConfig};
    use crate::error::Error;
    use crate::http::FetchProfiles;
    use crate::models::{FilteredArticle, NewArticle, NewSource, SourceTestRecord, SourceType};
    use crate::oracle::Oracle;
    use crate::prompts::PromptLoader;
    use crate::store::MemoryStore;
    use crate::test_support::{ScriptedOracle, StubFetcher};
    use crate::translate::OracleTranslator;

    fn feed(host: &str, titles: &[&str]) -> String {
        let items: String = titles
            .iter()
            .enumerate()
            .map(|(i, t)| format!("<item><title>{t}</title><link>https://{host}/{i}</link></item>"))
            .collect();
        format!("<rss><channel>{items}</channel></rss>")
    }

    async fn active_source(store: &MemoryStore, name: &str, url: &str) {
        let src = store
            .create_source(NewSource {
                url: url.into(),
                name: name.into(),
                category: "tech".into(),
                source_type: SourceType::Rss,
                scrape_config: None,
            })
            .await
            .unwrap();
        store
            .record_source_test(
                &src.id,
                SourceTestRecord {
                    success: true,
                    collection_url: url.into(),
                    source_type: SourceType::Rss,
                    test_result: serde_json::json!({}),
                    tested_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        store.set_source_active(&src.id, true).await.unwrap();
    }

    /// Rejects whatever line mentions gossip, clusters everything, and
    /// translates to a fixed string.
    fn oracle() -> ScriptedOracle {
        ScriptedOracle::responding(|req| {
            let prompt = &req.user_prompt;
            if prompt.starts_with("Translate") {
                return Ok("已翻译".into());
            }
            if prompt.contains("hotTopics") {
                return Ok(r#"{"hotTopics": [{"topic": "Chips", "articleIndexes": [0, 1, 2, 3]}]}"#.into());
            }
            let gossip: Vec<String> = prompt
                .lines()
                .filter(|l| l.contains("gossip"))
                .filter_map(|l| l.split('.').next().map(str::to_string))
                .collect();
            Ok(format!(
                r#"{{"irrelevant": [{}], "reasoning": "entertainment"}}"#,
                gossip.join(",")
            ))
        })
    }

    fn pipeline(store: &MemoryStore, fetcher: StubFetcher, oracle: Arc<dyn Oracle>) -> Pipeline {
        let shared: Arc<dyn NewsStore> = Arc::new(store.clone());
        let prompts = Arc::new(PromptLoader::builtin());
        let collector = Collector::new(
            shared.clone(),
            Arc::new(fetcher),
            FetchProfiles::default(),
            ExtractorConfig::default(),
        );
        let filter = RelevanceFilter::new(
            shared.clone(),
            oracle.clone(),
            prompts.clone(),
            FilterConfig {
                batch_size: 50,
                batch_delay_ms: 0,
            },
        );
        let trending = TrendingAnalyzer::new(
            shared.clone(),
            oracle.clone(),
            prompts.clone(),
            TrendingConfig::default(),
        );
        let translator = OracleTranslator::new(oracle, prompts, "Simplified Chinese");
        let translation = TitleTranslation::new(
            shared.clone(),
            Arc::new(translator),
            TranslationConfig {
                group_delay_ms: 0,
                ..TranslationConfig::default()
            },
        );
        Pipeline::new(
            shared,
            Arc::new(collector),
            Arc::new(filter),
            Arc::new(trending),
            RetentionConfig::default(),
        )
        .with_translation(Arc::new(translation))
    }

    #[tokio::test]
    async fn full_cycle_runs_every_stage() {
        let store = MemoryStore::new();
        store
            .create_article(NewArticle {
                link: "https://old.example/1".into(),
                title: "Ancient news".into(),
                pub_date: Utc::now() - ChronoDuration::days(10),
                source: "Old".into(),
                category: "tech".into(),
                image_url: None,
            })
            .await
            .unwrap();
        store
            .record_filtered(vec![FilteredArticle {
                link: "https://old.example/2".into(),
                title: "Old gossip".into(),
                source: "Old".into(),
                reason: "entertainment".into(),
                filtered_at: Utc::now() - ChronoDuration::days(8),
            }])
            .await
            .unwrap();
        active_source(&store, "Alpha", "https://alpha.example/feed").await;
        active_source(&store, "Beta", "https://beta.example/feed").await;

        let fetcher = StubFetcher::new()
            .with_page(
                "https://alpha.example/feed",
                200,
                &feed("alpha.example", &["New chip unveiled", "Celebrity gossip roundup"]),
            )
            .with_page(
                "https://beta.example/feed",
                200,
                &feed("beta.example", &["Chip benchmarks are in", "Chip supply update"]),
            );
        let summary = pipeline(&store, fetcher, Arc::new(oracle())).run_cycle().await;

        assert!(summary.failed_stages.is_empty(), "{:?}", summary.failed_stages);
        assert_eq!(summary.deleted_articles, 1);
        assert_eq!(summary.deleted_filtered, 1);
        assert_eq!(summary.sources_collected, 2);
        assert_eq!(summary.collected, 4);
        assert_eq!(summary.filtered, 1);
        assert_eq!(summary.translation.as_ref().unwrap().translated, 3);
        assert_eq!(summary.hot_topics_48h, 1);
        assert_eq!(summary.hot_topics_24h, 1);

        let day = store.hot_topics(HotTopicWindow::Day).await.unwrap();
        assert_eq!(day[0].sources.len(), 2);
        assert_eq!(day[0].discussion_count, 3);
    }

    #[tokio::test]
    async fn failing_oracle_does_not_stop_the_cycle() {
        let store = MemoryStore::new();
        active_source(&store, "Alpha", "https://alpha.example/feed").await;
        let fetcher = StubFetcher::new().with_page(
            "https://alpha.example/feed",
            200,
            &feed("alpha.example", &["One", "Two"]),
        );
        let oracle = ScriptedOracle::responding(|_| Err(Error::Oracle("down".into())));
        let summary = pipeline(&store, fetcher, Arc::new(oracle)).run_cycle().await;

        assert!(summary.failed_stages.is_empty());
        assert_eq!(summary.collected, 2);
        assert_eq!(summary.filtered, 0);
        assert_eq!(summary.translation.unwrap().failed, 2);
        assert_eq!(summary.hot_topics_24h, 0);
        assert_eq!(store.untranslated_articles().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn filter_recent_covers_window_only() {
        let store = MemoryStore::new();
        for (i, age) in [1, 30].iter().enumerate() {
            store
                .create_article(NewArticle {
                    link: format!("https://a.example/{i}"),
                    title: "Celebrity gossip".into(),
                    pub_date: Utc::now() - ChronoDuration::hours(*age),
                    source: "A".into(),
                    category: "tech".into(),
                    image_url: None,
                })
                .await
                .unwrap();
        }
        let out = pipeline(&store, StubFetcher::new(), Arc::new(oracle()))
            .filter_recent(24)
            .await
            .unwrap();
        assert_eq!(out.total, 1);
        assert_eq!(out.filtered, 1);
        assert_eq!(
            store
                .articles_since(Utc::now() - ChronoDuration::days(2))
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
