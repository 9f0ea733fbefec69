use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::NewsStore;
use crate::error::{Error, Result};
use crate::models::{
    Article, FilteredArticle, HotTopic, HotTopicWindow, NewArticle, NewSource, Source,
    SourceTestRecord, SourceUpdate, TestStatus,
};
use crate::utils::ensure_writable_dir;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Tables {
    articles: Vec<Article>,
    filtered_articles: Vec<FilteredArticle>,
    sources: Vec<Source>,
    hot_topics: Vec<HotTopic>,
}

impl Tables {
    fn source_mut(&mut self, id: &str) -> Result<&mut Source> {
        self.sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::NotFound(format!("source {id}")))
    }

    fn url_owned_by_other(&self, url: &str, id: &str) -> bool {
        self.sources.iter().any(|s| s.url == url && s.id != id)
    }
}

/// A change to apply and whether it touched anything worth persisting.
type Changed<T> = (T, bool);

/// In-process [`NewsStore`] with optional JSON snapshot persistence.
///
/// Every mutation runs under one write lock, so unique checks and inserts are
/// atomic with respect to concurrent collectors. A mutation is applied to a
/// copy of the tables; the copy is written to the snapshot (when there is
/// one) and only then replaces the live tables, so a failed write leaves the
/// store exactly as it was.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    /// Volatile store, nothing touches disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the snapshot at `path` if it exists and persist future mutations
    /// there.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_writable_dir(parent).await?;
        }
        let tables = match fs::read_to_string(path).await {
            Ok(raw) if raw.trim().is_empty() => Tables::default(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => return Err(e.into()),
        };
        info!(
            articles = tables.articles.len(),
            sources = tables.sources.len(),
            filtered = tables.filtered_articles.len(),
            "Store opened"
        );
        Ok(Self {
            tables: Arc::new(RwLock::new(tables)),
            snapshot: Some(path.to_path_buf()),
        })
    }

    /// Run `change` against a copy of the tables, persist the copy if it
    /// reports a change, then swap it in.
    async fn mutate<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut Tables) -> Result<Changed<T>>,
    {
        let mut live = self.tables.write().await;
        let mut next = live.clone();
        let (value, changed) = change(&mut next)?;
        if changed {
            self.persist(&next).await?;
            *live = next;
        }
        Ok(value)
    }

    async fn persist(&self, tables: &Tables) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let json = serde_json::to_string(tables)?;
        let tmp = path.with_extension("json.tmp");
        let written = match fs::write(&tmp, json.as_bytes()).await {
            Ok(()) => fs::rename(&tmp, path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            error!(path = %path.display(), error = %e, "Failed to write store snapshot");
            return Err(e.into());
        }
        debug!(path = %path.display(), bytes = json.len(), "Store snapshot written");
        Ok(())
    }

    /// Single insert that reports a taken link as `Error::Duplicate`.
    #[cfg(test)]
    pub async fn create_article(&self, new: NewArticle) -> Result<Article> {
        let link = new.link.clone();
        self.create_articles(vec![new])
            .await?
            .pop()
            .ok_or(Error::Duplicate(link))
    }

    /// Seed the denylist without touching any article.
    #[cfg(test)]
    pub async fn record_filtered(&self, rows: Vec<FilteredArticle>) -> Result<usize> {
        Ok(self.reject_articles(&[], rows).await?.0)
    }
}

fn newest_first(articles: &mut [Article]) {
    articles.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
}

fn to_article(new: NewArticle, now: DateTime<Utc>) -> Article {
    Article {
        id: Uuid::new_v4().to_string(),
        link: new.link,
        title_original: new.title.clone(),
        title: new.title,
        description: None,
        description_original: None,
        content: None,
        content_original: None,
        pub_date: new.pub_date,
        source: new.source,
        category: new.category,
        image_url: new.image_url,
        is_translated: false,
        created_at: now,
    }
}

#[async_trait]
impl NewsStore for MemoryStore {
    async fn create_articles(&self, batch: Vec<NewArticle>) -> Result<Vec<Article>> {
        self.mutate(|t| {
            let mut taken: HashSet<String> = t.articles.iter().map(|a| a.link.clone()).collect();
            let now = Utc::now();
            let mut created = Vec::new();
            for new in batch {
                if !taken.insert(new.link.clone()) {
                    debug!(link = %new.link, "Article already exists, skipping");
                    continue;
                }
                created.push(to_article(new, now));
            }
            t.articles.extend(created.iter().cloned());
            let changed = !created.is_empty();
            Ok((created, changed))
        })
        .await
    }

    async fn existing_article_links(&self, links: &[String]) -> Result<HashSet<String>> {
        let wanted: HashSet<&str> = links.iter().map(String::as_str).collect();
        let t = self.tables.read().await;
        Ok(t.articles
            .iter()
            .filter(|a| wanted.contains(a.link.as_str()))
            .map(|a| a.link.clone())
            .collect())
    }

    async fn filtered_links(&self, links: &[String]) -> Result<HashSet<String>> {
        let wanted: HashSet<&str> = links.iter().map(String::as_str).collect();
        let t = self.tables.read().await;
        Ok(t.filtered_articles
            .iter()
            .filter(|f| wanted.contains(f.link.as_str()))
            .map(|f| f.link.clone())
            .collect())
    }

    async fn articles_by_ids(&self, ids: &[String]) -> Result<Vec<Article>> {
        let t = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| t.articles.iter().find(|a| &a.id == id).cloned())
            .collect())
    }

    async fn articles_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Article>> {
        let t = self.tables.read().await;
        let mut out: Vec<Article> = t
            .articles
            .iter()
            .filter(|a| a.pub_date >= cutoff)
            .cloned()
            .collect();
        newest_first(&mut out);
        Ok(out)
    }

    async fn untranslated_articles(&self) -> Result<Vec<Article>> {
        let t = self.tables.read().await;
        let mut out: Vec<Article> = t
            .articles
            .iter()
            .filter(|a| !a.is_translated)
            .cloned()
            .collect();
        newest_first(&mut out);
        Ok(out)
    }

    async fn mark_translated(&self, id: &str, title: String) -> Result<()> {
        self.mutate(|t| {
            let article = t
                .articles
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| Error::NotFound(format!("article {id}")))?;
            article.title = title;
            article.is_translated = true;
            Ok(((), true))
        })
        .await
    }

    async fn delete_articles_published_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.mutate(|t| {
            let before = t.articles.len();
            t.articles.retain(|a| a.pub_date >= cutoff);
            let removed = before - t.articles.len();
            Ok((removed, removed > 0))
        })
        .await
    }

    async fn reject_articles(
        &self,
        ids: &[String],
        rows: Vec<FilteredArticle>,
    ) -> Result<(usize, usize)> {
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.mutate(|t| {
            let mut known: HashSet<String> =
                t.filtered_articles.iter().map(|f| f.link.clone()).collect();
            let mut recorded = 0;
            for row in rows {
                if known.insert(row.link.clone()) {
                    t.filtered_articles.push(row);
                    recorded += 1;
                }
            }
            let before = t.articles.len();
            t.articles.retain(|a| !doomed.contains(a.id.as_str()));
            let deleted = before - t.articles.len();
            Ok(((recorded, deleted), recorded + deleted > 0))
        })
        .await
    }

    async fn delete_filtered_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.mutate(|t| {
            let before = t.filtered_articles.len();
            t.filtered_articles.retain(|f| f.filtered_at >= cutoff);
            let removed = before - t.filtered_articles.len();
            Ok((removed, removed > 0))
        })
        .await
    }

    async fn create_source(&self, new: NewSource) -> Result<Source> {
        self.mutate(|t| {
            if t.sources.iter().any(|s| s.url == new.url) {
                return Err(Error::Duplicate(new.url));
            }
            let source = Source {
                id: Uuid::new_v4().to_string(),
                url: new.url,
                name: new.name,
                category: new.category,
                source_type: new.source_type,
                is_active: false,
                is_tested: false,
                test_status: TestStatus::Pending,
                test_result: None,
                scrape_config: new.scrape_config,
                last_tested: None,
                last_fetched: None,
                created_at: Utc::now(),
            };
            t.sources.push(source.clone());
            Ok((source, true))
        })
        .await
    }

    async fn get_source(&self, id: &str) -> Result<Source> {
        let t = self.tables.read().await;
        t.sources
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("source {id}")))
    }

    async fn find_source_by_url(&self, url: &str) -> Result<Option<Source>> {
        let t = self.tables.read().await;
        Ok(t.sources.iter().find(|s| s.url == url).cloned())
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        Ok(self.tables.read().await.sources.clone())
    }

    async fn collectable_sources(&self) -> Result<Vec<Source>> {
        let t = self.tables.read().await;
        Ok(t.sources
            .iter()
            .filter(|s| s.is_collectable())
            .cloned()
            .collect())
    }

    async fn update_source(&self, id: &str, update: SourceUpdate) -> Result<Source> {
        self.mutate(|t| {
            if let Some(url) = &update.url {
                if t.url_owned_by_other(url, id) {
                    return Err(Error::Duplicate(url.clone()));
                }
            }
            let source = t.source_mut(id)?;
            update.apply(source);
            Ok((source.clone(), true))
        })
        .await
    }

    async fn set_source_active(&self, id: &str, active: bool) -> Result<Source> {
        self.mutate(|t| {
            let source = t.source_mut(id)?;
            source.set_active(active)?;
            Ok((source.clone(), true))
        })
        .await
    }

    async fn record_source_test(&self, id: &str, record: SourceTestRecord) -> Result<Source> {
        self.mutate(|t| {
            if record.success && t.url_owned_by_other(&record.collection_url, id) {
                return Err(Error::Duplicate(record.collection_url));
            }
            let source = t.source_mut(id)?;
            record.apply(source);
            Ok((source.clone(), true))
        })
        .await
    }

    async fn touch_last_fetched(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.mutate(|t| {
            t.source_mut(id)?.last_fetched = Some(at);
            Ok(((), true))
        })
        .await
    }

    async fn delete_source(&self, id: &str) -> Result<()> {
        self.mutate(|t| {
            let before = t.sources.len();
            t.sources.retain(|s| s.id != id);
            if t.sources.len() == before {
                return Err(Error::NotFound(format!("source {id}")));
            }
            Ok(((), true))
        })
        .await
    }

    async fn replace_hot_topics(
        &self,
        window: HotTopicWindow,
        topics: Vec<HotTopic>,
    ) -> Result<()> {
        self.mutate(|t| {
            t.hot_topics.retain(|h| h.window != window);
            t.hot_topics.extend(topics);
            Ok(((), true))
        })
        .await
    }

    async fn hot_topics(&self, window: HotTopicWindow) -> Result<Vec<HotTopic>> {
        let t = self.tables.read().await;
        let mut out: Vec<HotTopic> = t
            .hot_topics
            .iter()
            .filter(|h| h.window == window)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.score.cmp(&a.score));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;
    use chrono::Duration;

    fn new_article(link: &str, hours_ago: i64) -> NewArticle {
        NewArticle {
            link: link.into(),
            title: format!("Title for {link}"),
            pub_date: Utc::now() - Duration::hours(hours_ago),
            source: "Example".into(),
            category: "tech".into(),
            image_url: None,
        }
    }

    fn new_source(url: &str) -> NewSource {
        NewSource {
            url: url.into(),
            name: "Example".into(),
            category: "tech".into(),
            source_type: SourceType::Rss,
            scrape_config: None,
        }
    }

    fn record(success: bool, url: &str) -> SourceTestRecord {
        SourceTestRecord {
            success,
            collection_url: url.into(),
            source_type: SourceType::Rss,
            test_result: serde_json::json!({ "success": success }),
            tested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn article_links_are_unique() {
        let store = MemoryStore::new();
        let a = store.create_article(new_article("https://a.example/1", 1)).await.unwrap();
        assert_eq!(a.title, a.title_original);
        assert!(!a.is_translated);

        let err = store
            .create_article(new_article("https://a.example/1", 2))
            .await
            .unwrap_err();
        assert!(err.is_duplicate());

        let links = vec!["https://a.example/1".to_string(), "https://a.example/2".to_string()];
        let existing = store.existing_article_links(&links).await.unwrap();
        assert_eq!(existing.len(), 1);
        assert!(existing.contains("https://a.example/1"));
    }

    #[tokio::test]
    async fn articles_since_is_newest_first_and_bounded() {
        let store = MemoryStore::new();
        store.create_article(new_article("https://a.example/old", 72)).await.unwrap();
        store.create_article(new_article("https://a.example/mid", 10)).await.unwrap();
        store.create_article(new_article("https://a.example/new", 1)).await.unwrap();

        let recent = store
            .articles_since(Utc::now() - Duration::hours(24))
            .await
            .unwrap();
        let links: Vec<&str> = recent.iter().map(|a| a.link.as_str()).collect();
        assert_eq!(links, ["https://a.example/new", "https://a.example/mid"]);

        let removed = store
            .delete_articles_published_before(Utc::now() - Duration::days(2))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn filtered_records_skip_duplicates() {
        let store = MemoryStore::new();
        let row = |link: &str| FilteredArticle {
            link: link.into(),
            title: "Deal of the day".into(),
            source: "Example".into(),
            reason: "shopping".into(),
            filtered_at: Utc::now(),
        };
        let n = store
            .record_filtered(vec![row("https://a.example/x"), row("https://a.example/x")])
            .await
            .unwrap();
        assert_eq!(n, 1);
        let n = store.record_filtered(vec![row("https://a.example/x")]).await.unwrap();
        assert_eq!(n, 0);
        let hits = store
            .filtered_links(&["https://a.example/x".to_string()])
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn activation_requires_successful_test() {
        let store = MemoryStore::new();
        let s = store.create_source(new_source("https://a.example/feed")).await.unwrap();
        assert!(store.set_source_active(&s.id, true).await.is_err());
        assert!(!store.get_source(&s.id).await.unwrap().is_active);

        store.record_source_test(&s.id, record(true, "https://a.example/feed")).await.unwrap();
        let s = store.set_source_active(&s.id, true).await.unwrap();
        assert!(s.is_active);
        assert_eq!(store.collectable_sources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn url_collisions_are_rejected_atomically() {
        let store = MemoryStore::new();
        let a = store.create_source(new_source("https://a.example/feed")).await.unwrap();
        let b = store.create_source(new_source("https://b.example/")).await.unwrap();
        assert!(store.create_source(new_source("https://a.example/feed")).await.is_err());

        let err = store
            .update_source(
                &b.id,
                SourceUpdate {
                    url: Some(a.url.clone()),
                    name: Some("Renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(store.get_source(&b.id).await.unwrap().name, "Example");

        let err = store
            .record_source_test(&b.id, record(true, &a.url))
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(
            store.get_source(&b.id).await.unwrap().test_status,
            TestStatus::Pending
        );
    }

    #[tokio::test]
    async fn hot_topics_replace_per_window() {
        let store = MemoryStore::new();
        let topic = |window, title: &str, score| HotTopic {
            id: Uuid::new_v4().to_string(),
            window,
            title: title.into(),
            discussion_count: 2,
            sources: vec!["A".into(), "B".into()],
            article_ids: vec![],
            score,
            created_at: Utc::now(),
        };
        store
            .replace_hot_topics(
                HotTopicWindow::Day,
                vec![topic(HotTopicWindow::Day, "low", 16), topic(HotTopicWindow::Day, "high", 21)],
            )
            .await
            .unwrap();
        store
            .replace_hot_topics(HotTopicWindow::TwoDays, vec![topic(HotTopicWindow::TwoDays, "other", 40)])
            .await
            .unwrap();
        store
            .replace_hot_topics(HotTopicWindow::Day, vec![topic(HotTopicWindow::Day, "fresh", 30)])
            .await
            .unwrap();

        let day = store.hot_topics(HotTopicWindow::Day).await.unwrap();
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].title, "fresh");
        assert_eq!(store.hot_topics(HotTopicWindow::TwoDays).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batch_insert_skips_known_and_repeated_links() {
        let store = MemoryStore::new();
        store.create_article(new_article("https://a.example/1", 1)).await.unwrap();
        let created = store
            .create_articles(vec![
                new_article("https://a.example/1", 1),
                new_article("https://a.example/2", 1),
                new_article("https://a.example/2", 2),
                new_article("https://a.example/3", 3),
            ])
            .await
            .unwrap();
        let links: Vec<&str> = created.iter().map(|a| a.link.as_str()).collect();
        assert_eq!(links, ["https://a.example/2", "https://a.example/3"]);
        assert!(store.create_articles(vec![]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejection_records_and_deletes_together() {
        let store = MemoryStore::new();
        let keep = store.create_article(new_article("https://a.example/keep", 1)).await.unwrap();
        let gone = store.create_article(new_article("https://a.example/drop", 1)).await.unwrap();
        let row = FilteredArticle {
            link: gone.link.clone(),
            title: gone.title.clone(),
            source: gone.source.clone(),
            reason: "shopping".into(),
            filtered_at: Utc::now(),
        };

        let (recorded, deleted) = store
            .reject_articles(&[gone.id.clone()], vec![row])
            .await
            .unwrap();
        assert_eq!((recorded, deleted), (1, 1));
        let ids = vec![keep.id.clone(), gone.id.clone()];
        let left = store.articles_by_ids(&ids).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, keep.id);
        let hits = store.filtered_links(&[gone.link.clone()]).await.unwrap();
        assert!(hits.contains(&gone.link));
    }

    #[tokio::test]
    async fn failed_snapshot_write_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = MemoryStore::open(&path).await.unwrap();
        let kept = store.create_article(new_article("https://a.example/kept", 1)).await.unwrap();

        // A directory in place of the temp file makes the next write fail.
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();

        let links = vec!["https://a.example/new".to_string()];
        assert!(store
            .create_articles(vec![new_article("https://a.example/new", 1)])
            .await
            .is_err());
        assert!(store.existing_article_links(&links).await.unwrap().is_empty());

        let row = FilteredArticle {
            link: kept.link.clone(),
            title: kept.title.clone(),
            source: kept.source.clone(),
            reason: "shopping".into(),
            filtered_at: Utc::now(),
        };
        assert!(store.reject_articles(&[kept.id.clone()], vec![row]).await.is_err());
        assert_eq!(store.articles_by_ids(&[kept.id.clone()]).await.unwrap().len(), 1);
        assert!(store.filtered_links(&[kept.link.clone()]).await.unwrap().is_empty());

        std::fs::remove_dir(path.with_extension("json.tmp")).unwrap();
        let reopened = MemoryStore::open(&path).await.unwrap();
        assert!(reopened.existing_article_links(&links).await.unwrap().is_empty());
        assert_eq!(reopened.articles_by_ids(&[kept.id]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/store.json");

        let store = MemoryStore::open(&path).await.unwrap();
        store.create_article(new_article("https://a.example/1", 1)).await.unwrap();
        store.create_source(new_source("https://a.example/feed")).await.unwrap();
        drop(store);

        let reopened = MemoryStore::open(&path).await.unwrap();
        assert_eq!(reopened.list_sources().await.unwrap().len(), 1);
        let links = reopened
            .existing_article_links(&["https://a.example/1".to_string()])
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
    }
}
