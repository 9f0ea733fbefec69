//! Relevance filter.
//!
//! Asks the oracle which freshly collected articles are off-topic, moves those
//! links to the filtered denylist and deletes the articles. Each batch fails
//! open: if anything goes wrong the whole batch is kept.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::FilterConfig;
use crate::error::Result;
use crate::models::{Article, FilteredArticle};
use crate::oracle::{Oracle, parse_json_reply};
use crate::prompts::{CONTENT_FILTER, PromptLoader};
use crate::store::NewsStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOutcome {
    pub relevant_ids: Vec<String>,
    pub irrelevant_ids: Vec<String>,
    pub total: usize,
    pub filtered: usize,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default)]
    irrelevant: Vec<i64>,
    #[serde(default)]
    reasoning: String,
}

pub struct RelevanceFilter {
    store: Arc<dyn NewsStore>,
    oracle: Arc<dyn Oracle>,
    prompts: Arc<PromptLoader>,
    cfg: FilterConfig,
}

impl RelevanceFilter {
    pub fn new(
        store: Arc<dyn NewsStore>,
        oracle: Arc<dyn Oracle>,
        prompts: Arc<PromptLoader>,
        cfg: FilterConfig,
    ) -> Self {
        Self {
            store,
            oracle,
            prompts,
            cfg,
        }
    }

    /// Classify the articles behind `ids` and drop the irrelevant ones.
    ///
    /// Ids that no longer resolve to an article are ignored and do not count
    /// toward `total`.
    #[instrument(level = "info", skip_all, fields(requested = ids.len()))]
    pub async fn filter_irrelevant_articles(&self, ids: &[String]) -> Result<FilterOutcome> {
        let articles = self.store.articles_by_ids(ids).await?;
        let mut outcome = FilterOutcome {
            total: articles.len(),
            ..FilterOutcome::default()
        };
        if articles.is_empty() {
            return Ok(outcome);
        }

        let batch_size = self.cfg.batch_size.max(1);
        let batches = articles.chunks(batch_size).count();
        for (n, batch) in articles.chunks(batch_size).enumerate() {
            if n > 0 {
                sleep(Duration::from_millis(self.cfg.batch_delay_ms)).await;
            }
            let rejected = match self.filter_batch(batch).await {
                Ok(rejected) => rejected,
                Err(e) => {
                    warn!(batch = n + 1, of = batches, error = %e, "Filter batch failed; keeping all");
                    BTreeSet::new()
                }
            };
            for (i, article) in batch.iter().enumerate() {
                if rejected.contains(&i) {
                    outcome.irrelevant_ids.push(article.id.clone());
                } else {
                    outcome.relevant_ids.push(article.id.clone());
                }
            }
        }

        outcome.filtered = outcome.irrelevant_ids.len();
        info!(
            total = outcome.total,
            kept = outcome.relevant_ids.len(),
            removed = outcome.filtered,
            "Relevance filter finished"
        );
        Ok(outcome)
    }

    /// Judge one batch and apply the verdict. Returns the rejected positions.
    async fn filter_batch(&self, batch: &[Article]) -> Result<BTreeSet<usize>> {
        let template = self.prompts.load(CONTENT_FILTER).await?;
        let list = article_list(batch);
        let reply = self
            .oracle
            .complete(&template.request(&[("articleList", list.as_str())]))
            .await?;
        let verdict: Verdict = parse_json_reply(&reply)?;

        let rejected: BTreeSet<usize> = verdict
            .irrelevant
            .iter()
            .filter_map(|&i| usize::try_from(i).ok())
            .filter(|&i| i < batch.len())
            .collect();
        if rejected.len() < verdict.irrelevant.len() {
            debug!(
                returned = verdict.irrelevant.len(),
                usable = rejected.len(),
                "Ignored out-of-range or repeated indexes"
            );
        }
        if rejected.is_empty() {
            return Ok(rejected);
        }

        let now = Utc::now();
        let rows: Vec<FilteredArticle> = rejected
            .iter()
            .map(|&i| FilteredArticle {
                link: batch[i].link.clone(),
                title: batch[i].display_title().to_string(),
                source: batch[i].source.clone(),
                reason: verdict.reasoning.clone(),
                filtered_at: now,
            })
            .collect();
        let ids: Vec<String> = rejected.iter().map(|&i| batch[i].id.clone()).collect();
        let (recorded, deleted) = self.store.reject_articles(&ids, rows).await?;
        info!(
            recorded,
            deleted,
            reasoning = %verdict.reasoning,
            "Removed irrelevant articles"
        );
        Ok(rejected)
    }
}

/// `index. [source] title`, one per line, indexes relative to the batch.
fn article_list(batch: &[Article]) -> String {
    batch
        .iter()
        .enumerate()
        .map(|(i, a)| format!("{i}. [{}] {}", a.source, a.display_title()))
        .collect::<Vec<_>>()
        .join("\n")
}
