//! Title translation.
//!
//! Runs over untranslated articles newest first, a few at a time, pausing
//! between groups to stay under the provider's rate limit. Titles already in
//! the target script are marked translated without a call.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};

use crate::config::TranslationConfig;
use crate::error::{Error, Result};
use crate::models::Article;
use crate::oracle::Oracle;
use crate::prompts::{PromptLoader, TITLE_TRANSLATION};
use crate::store::NewsStore;

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str) -> Result<String>;
}

/// [`Translator`] backed by the `title_translation` prompt.
pub struct OracleTranslator {
    oracle: Arc<dyn Oracle>,
    prompts: Arc<PromptLoader>,
    target_language: String,
}

impl OracleTranslator {
    pub fn new(oracle: Arc<dyn Oracle>, prompts: Arc<PromptLoader>, target_language: &str) -> Self {
        Self {
            oracle,
            prompts,
            target_language: target_language.to_string(),
        }
    }
}

#[async_trait]
impl Translator for OracleTranslator {
    async fn translate(&self, text: &str) -> Result<String> {
        let template = self.prompts.load(TITLE_TRANSLATION).await?;
        let reply = self
            .oracle
            .complete(&template.request(&[
                ("targetLanguage", self.target_language.as_str()),
                ("title", text),
            ]))
            .await?;
        let translated = reply.trim().trim_matches('"').trim();
        if translated.is_empty() {
            return Err(Error::Oracle("empty translation".into()));
        }
        Ok(translated.to_string())
    }
}

/// Share of CJK unified ideographs among the non-whitespace characters is
/// above `threshold`.
pub fn is_chinese(text: &str, threshold: f64) -> bool {
    let (cjk, total) = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .fold((0usize, 0usize), |(cjk, total), c| {
            let is_cjk = ('\u{4e00}'..='\u{9fa5}').contains(&c);
            (cjk + usize::from(is_cjk), total + 1)
        });
    total > 0 && cjk as f64 / total as f64 > threshold
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationReport {
    pub pending: usize,
    pub translated: usize,
    /// Already in the target script; marked without a call.
    pub skipped: usize,
    pub failed: usize,
}

enum ItemOutcome {
    Translated,
    Skipped,
    Failed,
}

pub struct TitleTranslation {
    store: Arc<dyn NewsStore>,
    translator: Arc<dyn Translator>,
    cfg: TranslationConfig,
}

impl TitleTranslation {
    pub fn new(
        store: Arc<dyn NewsStore>,
        translator: Arc<dyn Translator>,
        cfg: TranslationConfig,
    ) -> Self {
        Self {
            store,
            translator,
            cfg,
        }
    }

    /// Translate every pending title. Per-article failures are counted and
    /// left for the next run.
    #[instrument(level = "info", skip_all)]
    pub async fn translate_pending(&self) -> Result<TranslationReport> {
        let pending = self.store.untranslated_articles().await?;
        let mut report = TranslationReport {
            pending: pending.len(),
            ..TranslationReport::default()
        };
        let group_size = self.cfg.concurrency.max(1);
        let groups = pending.chunks(group_size).count();

        for (n, group) in pending.chunks(group_size).enumerate() {
            let outcomes = join_all(group.iter().map(|a| self.translate_one(a))).await;
            for outcome in outcomes {
                match outcome {
                    ItemOutcome::Translated => report.translated += 1,
                    ItemOutcome::Skipped => report.skipped += 1,
                    ItemOutcome::Failed => report.failed += 1,
                }
            }
            if n + 1 < groups {
                sleep(Duration::from_millis(self.cfg.group_delay_ms)).await;
            }
        }

        info!(
            pending = report.pending,
            translated = report.translated,
            skipped = report.skipped,
            failed = report.failed,
            "Translation finished"
        );
        Ok(report)
    }

    async fn translate_one(&self, article: &Article) -> ItemOutcome {
        let original = if article.title_original.is_empty() {
            article.title.as_str()
        } else {
            article.title_original.as_str()
        };

        if is_chinese(original, self.cfg.skip_ratio) {
            return match self.store.mark_translated(&article.id, original.to_string()).await {
                Ok(()) => {
                    debug!(id = %article.id, "Title already in target script");
                    ItemOutcome::Skipped
                }
                Err(e) => {
                    error!(id = %article.id, error = %e, "Failed to mark title");
                    ItemOutcome::Failed
                }
            };
        }

        let result = match self.translator.translate(original).await {
            Ok(title) => self.store.mark_translated(&article.id, title).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => ItemOutcome::Translated,
            Err(e) => {
                error!(id = %article.id, error = %e, "Title translation failed");
                ItemOutcome::Failed
            }
        }
    }
}
