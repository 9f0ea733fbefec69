//! Hot topic clustering.
//!
//! The oracle proposes clusters over a numbered list of recent headlines; the
//! post-processing here does not trust it. Indexes are range-checked and
//! deduplicated, sources are recomputed from the articles themselves, clusters
//! backed by fewer than `min_sources` outlets are dropped, and the score is
//! computed locally.

use chrono::{Duration as ChronoDuration, Utc};
use itertools::Itertools;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::TrendingConfig;
use crate::error::Result;
use crate::models::{Article, HotTopic, HotTopicWindow};
use crate::oracle::{Oracle, parse_json_reply};
use crate::prompts::{PromptLoader, TRENDING_ANALYSIS};
use crate::store::NewsStore;

/// A cluster as proposed by the oracle, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedTopic {
    pub topic: String,
    #[serde(default)]
    pub article_indexes: Vec<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterReply {
    #[serde(default)]
    hot_topics: Vec<ProposedTopic>,
}

/// `5a + 3s`, plus `5(s - 2)` once three or more outlets cover the story.
pub fn trending_score(article_count: usize, source_count: usize) -> u32 {
    let bonus = if source_count >= 3 {
        (source_count - 2) * 5
    } else {
        0
    };
    (article_count * 5 + source_count * 3 + bonus) as u32
}

/// Validate proposed clusters against `articles` and rank them.
pub fn build_clusters(
    window: HotTopicWindow,
    articles: &[Article],
    proposed: Vec<ProposedTopic>,
    cfg: &TrendingConfig,
) -> Vec<HotTopic> {
    let now = Utc::now();
    let mut topics: Vec<HotTopic> = proposed
        .into_iter()
        .filter_map(|p| {
            let members: Vec<&Article> = p
                .article_indexes
                .iter()
                .filter_map(|&i| usize::try_from(i).ok())
                .filter(|&i| i < articles.len())
                .unique()
                .map(|i| &articles[i])
                .collect();
            if members.is_empty() {
                debug!(topic = %p.topic, "Dropping cluster without valid indexes");
                return None;
            }
            let sources: Vec<String> = members
                .iter()
                .map(|a| a.source.clone())
                .unique()
                .collect();
            if sources.len() < cfg.min_sources {
                debug!(topic = %p.topic, sources = sources.len(), "Dropping single-outlet cluster");
                return None;
            }
            Some(HotTopic {
                id: Uuid::new_v4().to_string(),
                window,
                title: p.topic,
                discussion_count: members.len(),
                score: trending_score(members.len(), sources.len()),
                article_ids: members.iter().map(|a| a.id.clone()).collect(),
                sources,
                created_at: now,
            })
        })
        .collect();

    topics.sort_by(|a, b| b.score.cmp(&a.score));
    topics.truncate(cfg.max_topics);
    topics
}

/// `[index] source | title`, one per line.
fn headline_list(articles: &[Article]) -> String {
    articles
        .iter()
        .enumerate()
        .map(|(i, a)| format!("[{i}] {} | {}", a.source, a.display_title()))
        .join("\n")
}

pub struct TrendingAnalyzer {
    store: Arc<dyn NewsStore>,
    oracle: Arc<dyn Oracle>,
    prompts: Arc<PromptLoader>,
    cfg: TrendingConfig,
}

impl TrendingAnalyzer {
    pub fn new(
        store: Arc<dyn NewsStore>,
        oracle: Arc<dyn Oracle>,
        prompts: Arc<PromptLoader>,
        cfg: TrendingConfig,
    ) -> Self {
        Self {
            store,
            oracle,
            prompts,
            cfg,
        }
    }

    /// Cluster the recent articles of `window`. Any failure yields an empty
    /// list.
    #[instrument(level = "info", skip_all, fields(%window))]
    pub async fn analyze_hot_topics(&self, window: HotTopicWindow) -> Vec<HotTopic> {
        match self.try_analyze(window).await {
            Ok(topics) => {
                info!(count = topics.len(), "Hot topic analysis finished");
                topics
            }
            Err(e) => {
                warn!(error = %e, "Hot topic analysis failed; returning no topics");
                Vec::new()
            }
        }
    }

    /// Analyze `window` and replace its stored topics with the result.
    pub async fn refresh_hot_topics(&self, window: HotTopicWindow) -> Result<Vec<HotTopic>> {
        let topics = self.analyze_hot_topics(window).await;
        self.store.replace_hot_topics(window, topics.clone()).await?;
        Ok(topics)
    }

    async fn try_analyze(&self, window: HotTopicWindow) -> Result<Vec<HotTopic>> {
        let cutoff = Utc::now() - ChronoDuration::hours(window.hours());
        let mut articles = self.store.articles_since(cutoff).await?;
        if articles.is_empty() {
            info!("No articles in window");
            return Ok(Vec::new());
        }
        articles.truncate(self.cfg.max_articles);
        debug!(count = articles.len(), "Clustering articles");

        let template = self.prompts.load(TRENDING_ANALYSIS).await?;
        let hours = window.hours().to_string();
        let list = headline_list(&articles);
        let reply = self
            .oracle
            .complete(&template.request(&[("hours", hours.as_str()), ("articleList", list.as_str())]))
            .await?;
        let parsed: ClusterReply = parse_json_reply(&reply)?;
        debug!(proposed = parsed.hot_topics.len(), "Oracle proposed clusters");

        Ok(build_clusters(window, &articles, parsed.hot_topics, &self.cfg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewArticle;
    use crate::store::MemoryStore;
    use crate::test_support::ScriptedOracle;

    fn article(i: usize, source: &str) -> Article {
        Article {
            id: format!("a{i}"),
            link: format!("https://{source}.example/{i}"),
            title: format!("Headline {i}"),
            title_original: format!("Headline {i}"),
            description: None,
            description_original: None,
            content: None,
            content_original: None,
            pub_date: Utc::now(),
            source: source.to_string(),
            category: "tech".into(),
            image_url: None,
            is_translated: false,
            created_at: Utc::now(),
        }
    }

    fn proposal(topic: &str, idx: &[i64]) -> ProposedTopic {
        ProposedTopic {
            topic: topic.into(),
            article_indexes: idx.to_vec(),
        }
    }

    #[test]
    fn score_examples() {
        assert_eq!(trending_score(3, 2), 21);
        assert_eq!(trending_score(4, 4), 42);
    }

    #[test]
    fn score_is_monotonic() {
        for a in 1..20 {
            for s in 1..20 {
                assert!(trending_score(a + 1, s) >= trending_score(a, s));
                assert!(trending_score(a, s + 1) >= trending_score(a, s));
            }
        }
    }

    #[test]
    fn single_source_cluster_is_dropped_despite_claims() {
        let articles = vec![article(0, "verge"), article(1, "verge"), article(2, "wired")];
        let reply: ClusterReply = serde_json::from_str(
            r#"{"hotTopics": [{"topic": "Same outlet twice", "articleIndexes": [0, 1], "sources": ["verge", "wired", "ars"]}]}"#,
        )
        .unwrap();
        let topics = build_clusters(
            HotTopicWindow::Day,
            &articles,
            reply.hot_topics,
            &TrendingConfig::default(),
        );
        assert!(topics.is_empty());
    }

    #[test]
    fn invalid_and_repeated_indexes_are_ignored() {
        let articles = vec![article(0, "verge"), article(1, "wired"), article(2, "ars")];
        let topics = build_clusters(
            HotTopicWindow::TwoDays,
            &articles,
            vec![
                proposal("Chip launch", &[0, 1, 1, 7, -2]),
                proposal("Nothing valid", &[10, 11]),
            ],
            &TrendingConfig::default(),
        );
        assert_eq!(topics.len(), 1);
        let t = &topics[0];
        assert_eq!(t.article_ids, vec!["a0", "a1"]);
        assert_eq!(t.sources, vec!["verge", "wired"]);
        assert_eq!(t.discussion_count, 2);
        assert_eq!(t.score, trending_score(2, 2));
        assert_eq!(t.window, HotTopicWindow::TwoDays);
    }

    #[test]
    fn ranked_and_capped() {
        let articles: Vec<Article> = (0..40)
            .map(|i| article(i, ["verge", "wired", "ars", "tc"][i % 4]))
            .collect();
        let proposed: Vec<ProposedTopic> = (0..12)
            .map(|k| {
                let idx: Vec<i64> = (0..(2 + k % 3)).map(|j| (k * 3 + j) as i64).collect();
                proposal(&format!("topic {k}"), &idx)
            })
            .collect();
        let topics = build_clusters(HotTopicWindow::Day, &articles, proposed, &TrendingConfig::default());
        assert_eq!(topics.len(), 10);
        assert!(topics.windows(2).all(|w| w[0].score >= w[1].score));
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        for (i, source) in ["Verge", "Wired", "Ars"].iter().enumerate() {
            store
                .create_article(NewArticle {
                    link: format!("https://x.example/{i}"),
                    title: format!("GPU news {i}"),
                    pub_date: Utc::now() - ChronoDuration::minutes(i as i64),
                    source: source.to_string(),
                    category: "tech".into(),
                    image_url: None,
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn analyzer_persists_ranked_topics() {
        let store = seeded_store().await;
        let oracle = Arc::new(ScriptedOracle::new().reply(
            r#"{"hotTopics": [{"topic": "New GPUs", "articleIndexes": [0, 1, 2], "sources": ["Verge"]}]}"#,
        ));
        let analyzer = TrendingAnalyzer::new(
            Arc::new(store.clone()),
            oracle.clone(),
            Arc::new(PromptLoader::builtin()),
            TrendingConfig::default(),
        );
        let topics = analyzer.refresh_hot_topics(HotTopicWindow::Day).await.unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].score, trending_score(3, 3));
        assert_eq!(store.hot_topics(HotTopicWindow::Day).await.unwrap(), topics);

        let prompt = &oracle.requests()[0].user_prompt;
        assert!(prompt.contains("[0] Verge | GPU news 0"));
        assert!(prompt.contains("last 24 hours"));
    }

    #[tokio::test]
    async fn unparseable_reply_fails_closed() {
        let store = seeded_store().await;
        let analyzer = TrendingAnalyzer::new(
            Arc::new(store),
            Arc::new(ScriptedOracle::new().reply("Here are the topics: GPUs, AI")),
            Arc::new(PromptLoader::builtin()),
            TrendingConfig::default(),
        );
        assert!(analyzer.analyze_hot_topics(HotTopicWindow::TwoDays).await.is_empty());
    }
}
