//! Persistence seam.
//!
//! [`NewsStore`] is the full set of operations the pipeline needs. Unique
//! constraints (Article.link, FilteredArticle.link, Source.url) are the
//! store's job: batch inserts of articles and denylist rows skip taken links,
//! and a source edit that would collide returns
//! [`crate::error::Error::Duplicate`]. A failed write changes nothing.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::error::Result;
use crate::models::{
    Article, FilteredArticle, HotTopic, HotTopicWindow, NewArticle, NewSource, Source,
    SourceTestRecord, SourceUpdate,
};

#[async_trait]
pub trait NewsStore: Send + Sync {
    /// Insert a batch of articles in one write. Links already stored, or
    /// repeated within the batch, are skipped. Returns the inserted rows; on
    /// error nothing from the batch is stored.
    async fn create_articles(&self, batch: Vec<NewArticle>) -> Result<Vec<Article>>;

    /// Subset of `links` already stored as articles.
    async fn existing_article_links(&self, links: &[String]) -> Result<HashSet<String>>;

    /// Subset of `links` previously rejected by the relevance filter.
    async fn filtered_links(&self, links: &[String]) -> Result<HashSet<String>>;

    /// Articles for `ids`, in the order given. Unknown ids are skipped.
    async fn articles_by_ids(&self, ids: &[String]) -> Result<Vec<Article>>;

    /// Articles published at or after `cutoff`, newest first.
    async fn articles_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Article>>;

    /// Articles whose title has not been through translation, newest first.
    async fn untranslated_articles(&self) -> Result<Vec<Article>>;

    /// Replace the display title and flag the article as translated.
    async fn mark_translated(&self, id: &str, title: String) -> Result<()>;

    async fn delete_articles_published_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Record rejections and delete the rejected articles in one write.
    /// Rows whose link is already on the denylist are skipped. Returns
    /// `(recorded, deleted)`.
    async fn reject_articles(
        &self,
        ids: &[String],
        rows: Vec<FilteredArticle>,
    ) -> Result<(usize, usize)>;

    async fn delete_filtered_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Insert a source in the untested, inactive state.
    async fn create_source(&self, new: NewSource) -> Result<Source>;

    async fn get_source(&self, id: &str) -> Result<Source>;

    async fn find_source_by_url(&self, url: &str) -> Result<Option<Source>>;

    async fn list_sources(&self) -> Result<Vec<Source>>;

    /// Sources that are active, tested and passed their test.
    async fn collectable_sources(&self) -> Result<Vec<Source>>;

    /// Apply a partial edit atomically. A new URL owned by another source is
    /// rejected with `Error::Duplicate` and nothing changes.
    async fn update_source(&self, id: &str, update: SourceUpdate) -> Result<Source>;

    /// Toggle activation, enforcing the tested-successfully rule.
    async fn set_source_active(&self, id: &str, active: bool) -> Result<Source>;

    /// Persist a test outcome. A successful outcome whose collection URL is
    /// owned by another source is rejected with `Error::Duplicate`.
    async fn record_source_test(&self, id: &str, record: SourceTestRecord) -> Result<Source>;

    async fn touch_last_fetched(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn delete_source(&self, id: &str) -> Result<()>;

    /// Drop every topic of `window` and store `topics` in its place.
    async fn replace_hot_topics(&self, window: HotTopicWindow, topics: Vec<HotTopic>)
    -> Result<()>;

    /// Topics of `window`, highest score first.
    async fn hot_topics(&self, window: HotTopicWindow) -> Result<Vec<HotTopic>>;
}
