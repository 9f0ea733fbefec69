//! Feed discovery for a whole site.
//!
//! Collects every feed a site exposes (advertised, conventional and known
//! platform layouts), samples a few titles from each and has the oracle rate
//! how technology-focused the feed is. Feeds rated `recommend` or better are
//! suggested to the operator; nothing is persisted here.

use futures::future::join_all;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::detector::Detector;
use crate::error::Result;
use crate::feed::{parse_feed, sanitize_xml};
use crate::http::{FetchProfiles, Fetcher};
use crate::oracle::{Oracle, parse_json_reply};
use crate::prompts::{PromptLoader, RSS_ANALYSIS};

pub const SAMPLE_TITLES: usize = 10;

static FEED_NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"/([^/]+)/feed/?$",
        r"/feed/([^/]+)/?$",
        r"/tag/([^/]+)",
        r"/category/([^/]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid feed name pattern"))
    .collect()
});

static SITE_WIDE_FEED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(feed|rss)/?$").expect("valid site-wide feed pattern"));

const KNOWN_SITES: [(&str, &str); 11] = [
    ("techcrunch.com", "TechCrunch"),
    ("theverge.com", "The Verge"),
    ("arstechnica.com", "Ars Technica"),
    ("wired.com", "Wired"),
    ("engadget.com", "Engadget"),
    ("venturebeat.com", "VentureBeat"),
    ("technologyreview.com", "MIT Technology Review"),
    ("openai.com", "OpenAI"),
    ("36kr.com", "36氪"),
    ("tmtpost.com", "钛媒体"),
    ("infoq.cn", "InfoQ中国"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    Specific,
    General,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StronglyRecommend,
    Recommend,
    Caution,
    #[default]
    #[serde(other)]
    NotRecommend,
}

impl Recommendation {
    pub fn is_positive(self) -> bool {
        matches!(self, Recommendation::StronglyRecommend | Recommendation::Recommend)
    }
}

/// How a feed was rated. Missing fields in an oracle reply fall back to the
/// most conservative value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedAnalysis {
    pub feed_type: FeedType,
    pub category: String,
    pub tech_relevance: u32,
    pub ai_relevance: u32,
    pub confidence: u32,
    pub recommendation: Recommendation,
    pub reasoning: String,
}

impl Default for FeedAnalysis {
    fn default() -> Self {
        Self {
            feed_type: FeedType::Unknown,
            category: "Unknown".to_string(),
            tech_relevance: 0,
            ai_relevance: 0,
            confidence: 0,
            recommendation: Recommendation::NotRecommend,
            reasoning: String::new(),
        }
    }
}

impl FeedAnalysis {
    fn relevance(&self) -> u32 {
        self.tech_relevance + self.ai_relevance
    }

    /// Used when neither the oracle nor the URL gives a usable rating.
    pub fn needs_review() -> Self {
        Self {
            tech_relevance: 50,
            ai_relevance: 10,
            confidence: 30,
            recommendation: Recommendation::Caution,
            reasoning: "Automatic analysis failed; check this feed manually".to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredFeed {
    pub url: String,
    pub name: String,
    #[serde(flatten)]
    pub analysis: FeedAnalysis,
    pub sample_titles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    pub website_name: String,
    pub website_url: String,
    pub feeds: Vec<DiscoveredFeed>,
    pub recommended: Vec<DiscoveredFeed>,
    pub ignored: Vec<DiscoveredFeed>,
    pub reason: String,
}

/// Section feeds of well-known publishers plus WordPress category feeds.
/// These are only guesses; callers validate them before use.
pub fn platform_candidates(base: &Url) -> Vec<String> {
    let host = base.host_str().unwrap_or_default().to_ascii_lowercase();
    let mut out = Vec::new();
    if host.contains("arstechnica.com") {
        for section in ["ai", "gadgets", "information-technology", "science", "tech-policy"] {
            out.push(format!("https://arstechnica.com/{section}/feed/"));
        }
    }
    if host.contains("wired.com") {
        for category in ["ai", "gear", "science", "security", "business"] {
            out.push(format!("https://www.wired.com/feed/category/{category}/latest/rss"));
        }
    }
    if host.contains("medium.com") {
        for tag in ["ai", "machine-learning", "technology", "programming"] {
            out.push(format!("https://medium.com/feed/tag/{tag}"));
        }
    }
    for category in ["tech", "ai", "technology", "science"] {
        if let Ok(u) = base.join(&format!("/category/{category}/feed/")) {
            out.push(u.to_string());
        }
    }
    out
}

/// Rate a feed from its URL alone. `None` when the URL says nothing useful.
pub fn quick_classify(feed_url: &str) -> Option<FeedAnalysis> {
    let lower = feed_url.to_ascii_lowercase();
    if lower.contains("/ai/") || lower.contains("/artificial-intelligence/") {
        return Some(FeedAnalysis {
            feed_type: FeedType::Specific,
            category: "AI".into(),
            tech_relevance: 95,
            ai_relevance: 90,
            confidence: 90,
            recommendation: Recommendation::StronglyRecommend,
            reasoning: "URL pattern: AI section feed".into(),
        });
    }
    if ["/tech/", "/technology/", "/gadgets/"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return Some(FeedAnalysis {
            feed_type: FeedType::Specific,
            category: "General Tech".into(),
            tech_relevance: 90,
            ai_relevance: 20,
            confidence: 85,
            recommendation: Recommendation::StronglyRecommend,
            reasoning: "URL pattern: technology section feed".into(),
        });
    }
    if SITE_WIDE_FEED.is_match(&lower) {
        return Some(FeedAnalysis {
            feed_type: FeedType::General,
            category: "General".into(),
            tech_relevance: 50,
            ai_relevance: 10,
            confidence: 60,
            recommendation: Recommendation::Caution,
            reasoning: "URL pattern: site-wide feed, content needs confirming".into(),
        });
    }
    None
}

/// Split analysed feeds into recommended (best first) and ignored, with a
/// readable summary.
pub fn recommend(feeds: &[DiscoveredFeed]) -> (Vec<DiscoveredFeed>, Vec<DiscoveredFeed>, String) {
    let (mut recommended, ignored): (Vec<DiscoveredFeed>, Vec<DiscoveredFeed>) = feeds
        .iter()
        .cloned()
        .partition(|f| f.analysis.recommendation.is_positive());
    recommended.sort_by(|a, b| b.analysis.relevance().cmp(&a.analysis.relevance()));

    if recommended.is_empty() {
        return (
            Vec::new(),
            feeds.to_vec(),
            "No suitable feed found; try another technology outlet".to_string(),
        );
    }

    let specific = recommended
        .iter()
        .filter(|f| f.analysis.feed_type == FeedType::Specific)
        .count();
    let general = recommended
        .iter()
        .filter(|f| f.analysis.feed_type == FeedType::General)
        .count();
    let reason = match (specific, general) {
        (s, g) if s > 0 && g > 0 => {
            format!("Found {s} topic feeds and {g} site-wide feeds; pick what fits")
        }
        (s, _) if s > 0 => format!("Found {s} technology/AI topic feeds; prefer these"),
        (_, g) => format!("Found {g} site-wide feeds; the relevance filter will clean them"),
    };
    (recommended, ignored, reason)
}

/// Human name for a feed derived from its path.
pub fn feed_name(feed_url: &str) -> String {
    let Ok(url) = Url::parse(feed_url) else {
        return "Unknown Feed".to_string();
    };
    let path = url.path();
    for pattern in FEED_NAME_PATTERNS.iter() {
        if let Some(m) = pattern.captures(path).and_then(|c| c.get(1)) {
            return title_case(&m.as_str().replace('-', " "));
        }
    }
    if matches!(path, "/feed" | "/feed/" | "/rss" | "/rss/") {
        return "Main Feed".to_string();
    }
    url.host_str()
        .unwrap_or_default()
        .trim_start_matches("www.")
        .to_string()
}

/// Display name for a site, from a small table of known outlets.
pub fn website_name(website_url: &str) -> String {
    let Ok(url) = Url::parse(website_url) else {
        return "Unknown Website".to_string();
    };
    let host = url.host_str().unwrap_or_default().trim_start_matches("www.");
    KNOWN_SITES
        .iter()
        .find(|(domain, _)| *domain == host)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| host.to_string())
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .join(" ")
}

pub struct Discovery {
    detector: Arc<Detector>,
    fetcher: Arc<dyn Fetcher>,
    profiles: FetchProfiles,
    oracle: Arc<dyn Oracle>,
    prompts: Arc<PromptLoader>,
    pacing: Duration,
}

impl Discovery {
    pub fn new(
        detector: Arc<Detector>,
        fetcher: Arc<dyn Fetcher>,
        profiles: FetchProfiles,
        oracle: Arc<dyn Oracle>,
        prompts: Arc<PromptLoader>,
    ) -> Self {
        Self {
            detector,
            fetcher,
            profiles,
            oracle,
            prompts,
            pacing: Duration::from_millis(500),
        }
    }

    /// Pause between oracle calls.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Every feed URL found for the site, deduplicated.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn find_all_feeds(&self, url: &str) -> Vec<String> {
        let mut feeds = self.detector.find_feeds_in_page(url).await;
        if let Ok(base) = Url::parse(url) {
            feeds.extend(self.validated_platform_feeds(&base).await);
        }
        let feeds: Vec<String> = feeds.into_iter().unique().collect();
        info!(count = feeds.len(), "Feeds found");
        feeds
    }

    async fn validated_platform_feeds(&self, base: &Url) -> Vec<String> {
        let candidates = platform_candidates(base);
        let opts = self.profiles.probe();
        let checks = join_all(candidates.iter().map(|c| self.fetcher.head(c, &opts))).await;
        candidates
            .into_iter()
            .zip(checks)
            .filter_map(|(candidate, status)| match status {
                Ok(s) if (200..300).contains(&s) => Some(candidate),
                Ok(s) => {
                    debug!(url = %candidate, status = s, "Platform feed candidate rejected");
                    None
                }
                Err(_) => None,
            })
            .collect()
    }

    /// Up to `limit` non-empty titles from the feed. Errors give an empty list.
    pub async fn sample_titles(&self, feed_url: &str, limit: usize) -> Vec<String> {
        match self.try_sample(feed_url, limit).await {
            Ok(titles) => titles,
            Err(e) => {
                warn!(url = %feed_url, error = %e, "Sampling feed failed");
                Vec::new()
            }
        }
    }

    async fn try_sample(&self, feed_url: &str, limit: usize) -> Result<Vec<String>> {
        let body = self
            .fetcher
            .get(feed_url, &self.profiles.rss_test())
            .await?
            .into_body(feed_url)?;
        let feed = parse_feed(&sanitize_xml(&body))?;
        Ok(feed
            .items
            .into_iter()
            .take(limit)
            .filter_map(|i| i.title.filter(|t| !t.is_empty()))
            .collect())
    }

    /// Rate a feed from sampled titles. Falls back to the URL heuristic, then
    /// to a cautious default, when the oracle cannot be used.
    #[instrument(level = "info", skip_all, fields(url = %feed_url))]
    pub async fn analyze(&self, titles: &[String], feed_url: &str) -> FeedAnalysis {
        if titles.is_empty() {
            return FeedAnalysis {
                reasoning: "Feed is empty or unreachable".to_string(),
                ..FeedAnalysis::default()
            };
        }
        match self.ask_oracle(titles, feed_url).await {
            Ok(analysis) => {
                info!(recommendation = ?analysis.recommendation, reasoning = %analysis.reasoning, "Feed analysed");
                analysis
            }
            Err(e) => {
                warn!(error = %e, "Feed analysis failed; using fallback");
                quick_classify(feed_url).unwrap_or_else(FeedAnalysis::needs_review)
            }
        }
    }

    async fn ask_oracle(&self, titles: &[String], feed_url: &str) -> Result<FeedAnalysis> {
        let template = self.prompts.load(RSS_ANALYSIS).await?;
        let count = titles.len().to_string();
        let numbered = titles
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{}. {t}", i + 1))
            .join("\n");
        let reply = self
            .oracle
            .complete(&template.request(&[
                ("count", count.as_str()),
                ("feedUrl", feed_url),
                ("titles", numbered.as_str()),
            ]))
            .await?;
        parse_json_reply(&reply)
    }

    /// Full discovery for a site: find, sample, analyse, recommend.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn discover(&self, url: &str) -> DiscoveryReport {
        let website_name = website_name(url);
        let feed_urls = self.find_all_feeds(url).await;
        if feed_urls.is_empty() {
            return DiscoveryReport {
                website_name,
                website_url: url.to_string(),
                feeds: Vec::new(),
                recommended: Vec::new(),
                ignored: Vec::new(),
                reason: "No feeds found".to_string(),
            };
        }

        let mut analysed = Vec::new();
        for feed_url in feed_urls {
            let name = feed_name(&feed_url);
            let sample_titles = self.sample_titles(&feed_url, SAMPLE_TITLES).await;
            if sample_titles.is_empty() {
                debug!(feed = %feed_url, "No titles sampled; skipping");
                continue;
            }
            let analysis = self.analyze(&sample_titles, &feed_url).await;
            analysed.push(DiscoveredFeed {
                url: feed_url,
                name,
                analysis,
                sample_titles,
            });
            sleep(self.pacing).await;
        }

        let (recommended, ignored, reason) = recommend(&analysed);
        info!(
            recommended = recommended.len(),
            ignored = ignored.len(),
            "Discovery finished"
        );
        DiscoveryReport {
            website_name,
            website_url: url.to_string(),
            feeds: analysed,
            recommended,
            ignored,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedOracle, StubFetcher};

    fn feed_xml(titles: &[&str]) -> String {
        let items: String = titles
            .iter()
            .enumerate()
            .map(|(i, t)| format!("<item><title>{t}</title><link>https://x.example/{i}</link></item>"))
            .collect();
        format!("<rss><channel>{items}</channel></rss>")
    }

    fn discovery(fetcher: StubFetcher, oracle: ScriptedOracle) -> Discovery {
        let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);
        let detector = Arc::new(Detector::new(fetcher.clone(), None, FetchProfiles::default()));
        Discovery::new(
            detector,
            fetcher,
            FetchProfiles::default(),
            Arc::new(oracle),
            Arc::new(PromptLoader::builtin()),
        )
        .with_pacing(Duration::ZERO)
    }

    #[test]
    fn names() {
        assert_eq!(feed_name("https://arstechnica.com/information-technology/feed/"), "Information Technology");
        assert_eq!(feed_name("https://medium.com/feed/tag/machine-learning"), "Machine Learning");
        assert_eq!(feed_name("https://blog.example.com/feed"), "Main Feed");
        assert_eq!(feed_name("https://www.example.com/index.xml"), "example.com");
        assert_eq!(feed_name("not a url"), "Unknown Feed");
        assert_eq!(website_name("https://www.theverge.com/tech"), "The Verge");
        assert_eq!(website_name("https://news.example.org/"), "news.example.org");
    }

    #[test]
    fn platform_candidates_for_known_hosts() {
        let ars = platform_candidates(&Url::parse("https://arstechnica.com/").unwrap());
        assert!(ars.contains(&"https://arstechnica.com/ai/feed/".to_string()));
        assert_eq!(ars.len(), 5 + 4);

        let other = platform_candidates(&Url::parse("https://blog.example.com/x/y").unwrap());
        assert_eq!(other[0], "https://blog.example.com/category/tech/feed/");
        assert_eq!(other.len(), 4);
    }

    #[test]
    fn quick_classification() {
        assert_eq!(
            quick_classify("https://a.example/ai/feed/").unwrap().recommendation,
            Recommendation::StronglyRecommend
        );
        assert_eq!(
            quick_classify("https://a.example/feed").unwrap().recommendation,
            Recommendation::Caution
        );
        assert!(quick_classify("https://a.example/index.xml").is_none());
    }

    #[test]
    fn recommendation_ranks_by_relevance() {
        let feed = |url: &str, rec, tech, ai, kind| DiscoveredFeed {
            url: url.into(),
            name: url.into(),
            analysis: FeedAnalysis {
                feed_type: kind,
                tech_relevance: tech,
                ai_relevance: ai,
                recommendation: rec,
                ..FeedAnalysis::default()
            },
            sample_titles: vec![],
        };
        let feeds = vec![
            feed("a", Recommendation::Recommend, 60, 10, FeedType::General),
            feed("b", Recommendation::StronglyRecommend, 90, 80, FeedType::Specific),
            feed("c", Recommendation::Caution, 40, 5, FeedType::General),
        ];
        let (rec, ignored, reason) = recommend(&feeds);
        assert_eq!(rec.iter().map(|f| f.url.as_str()).collect::<Vec<_>>(), ["b", "a"]);
        assert_eq!(ignored.len(), 1);
        assert!(reason.contains("1 topic feeds and 1 site-wide"));

        let (rec, ignored, _) = recommend(&feeds[2..]);
        assert!(rec.is_empty());
        assert_eq!(ignored.len(), 1);
    }

    #[test]
    fn partial_oracle_reply_is_conservative() {
        let a: FeedAnalysis = parse_json_reply(r#"{"techRelevance": 70, "recommendation": "maybe"}"#).unwrap();
        assert_eq!(a.tech_relevance, 70);
        assert_eq!(a.recommendation, Recommendation::NotRecommend);
        assert_eq!(a.feed_type, FeedType::Unknown);
    }

    #[tokio::test]
    async fn discover_analyses_and_recommends() {
        let page = r#"<html><head><link rel="alternate" type="application/rss+xml" href="/ai/feed/"></head></html>"#;
        let fetcher = StubFetcher::new()
            .with_page("https://blog.example.com/", 200, page)
            .with_page(
                "https://blog.example.com/ai/feed/",
                200,
                &feed_xml(&["New LLM beats benchmark", "GPU prices fall"]),
            )
            .with_page(
                "https://blog.example.com/category/tech/feed/",
                200,
                &feed_xml(&["Celebrity gossip"]),
            );
        let oracle = ScriptedOracle::new()
            .reply(r#"{"feedType":"specific","category":"AI","techRelevance":90,"aiRelevance":85,"confidence":80,"recommendation":"strongly_recommend","reasoning":"AI desk"}"#)
            .reply(r#"{"feedType":"general","category":"Other","techRelevance":5,"aiRelevance":0,"confidence":70,"recommendation":"not_recommend","reasoning":"gossip"}"#);

        let report = discovery(fetcher, oracle).discover("https://blog.example.com/").await;
        assert_eq!(report.feeds.len(), 2);
        assert_eq!(report.recommended.len(), 1);
        assert_eq!(report.recommended[0].url, "https://blog.example.com/ai/feed/");
        assert_eq!(report.recommended[0].sample_titles.len(), 2);
        assert_eq!(report.ignored.len(), 1);
        assert_eq!(report.website_name, "blog.example.com");
    }

    #[tokio::test]
    async fn oracle_failure_uses_url_heuristic() {
        let d = discovery(StubFetcher::new(), ScriptedOracle::new().fail("down"));
        let a = d.analyze(&["t".to_string()], "https://x.example/tech/rss").await;
        assert_eq!(a.recommendation, Recommendation::StronglyRecommend);

        let d = discovery(StubFetcher::new(), ScriptedOracle::new().fail("down"));
        let a = d.analyze(&["t".to_string()], "https://x.example/index.xml").await;
        assert_eq!(a, FeedAnalysis::needs_review());
    }
}
