//! Source type detection: is this URL a feed, does the page advertise one,
//! or does it need HTML scraping?
//!
//! Detection never fails outward. Timeouts, 4xx/5xx and transport errors all
//! mean "not found here" and the next step of the cascade runs.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::feed::looks_like_feed;
use crate::http::{FetchProfiles, Fetcher, PageRenderer};
use crate::models::{DetectResult, SourceType};

/// Conventional feed locations, probed in this order.
pub const COMMON_FEED_PATHS: [&str; 9] = [
    "/feed",
    "/rss",
    "/feed.xml",
    "/rss.xml",
    "/atom.xml",
    "/index.xml",
    "/feeds/posts/default",
    "/?feed=rss2",
    "/feed/",
];

static LINK_TAGS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("link[href][type]").expect("valid link selector"));

/// URL substrings that suggest a feed endpoint.
pub fn is_likely_feed_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    ["/feed", "/rss", ".xml", "/atom"]
        .iter()
        .any(|hint| lower.contains(hint))
}

/// Absolute URLs of `<link type="application/rss+xml|atom+xml">` tags, in
/// document order and without duplicates.
pub fn feed_links_in_html(html: &str, base: &Url) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut out: Vec<String> = Vec::new();
    for el in doc.select(&LINK_TAGS) {
        let is_feed = el.value().attr("type").is_some_and(|t| {
            let t = t.trim().to_ascii_lowercase();
            t == "application/rss+xml" || t == "application/atom+xml"
        });
        if !is_feed {
            continue;
        }
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        if let Ok(abs) = base.join(href.trim()) {
            let abs = abs.to_string();
            if !out.contains(&abs) {
                out.push(abs);
            }
        }
    }
    out
}

pub struct Detector {
    fetcher: Arc<dyn Fetcher>,
    renderer: Option<Arc<dyn PageRenderer>>,
    profiles: FetchProfiles,
}

impl Detector {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        renderer: Option<Arc<dyn PageRenderer>>,
        profiles: FetchProfiles,
    ) -> Self {
        Self {
            fetcher,
            renderer,
            profiles,
        }
    }

    /// Classify `url` as `rss` or `web`.
    ///
    /// # Returns
    ///
    /// `detected: false` with an error only when the URL itself is unusable;
    /// otherwise a best-effort classification.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn detect(&self, url: &str) -> DetectResult {
        if let Err(e) = Url::parse(url) {
            return DetectResult {
                source_type: SourceType::Web,
                detected: false,
                rss_url: None,
                suggestions: Vec::new(),
                error: Some(format!("Invalid URL: {e}")),
            };
        }

        if is_likely_feed_url(url) && self.validate_feed(url).await {
            info!("URL is a feed");
            return DetectResult {
                source_type: SourceType::Rss,
                detected: true,
                rss_url: Some(url.to_string()),
                suggestions: Vec::new(),
                error: None,
            };
        }

        let feeds = self.find_feeds_in_page(url).await;
        if let Some(first) = feeds.first() {
            info!(feed = %first, candidates = feeds.len(), "Page advertises a feed");
            return DetectResult {
                source_type: SourceType::Rss,
                detected: true,
                rss_url: Some(first.clone()),
                suggestions: feeds,
                error: None,
            };
        }

        info!("No feed found; treating as web page");
        DetectResult {
            source_type: SourceType::Web,
            detected: true,
            rss_url: None,
            suggestions: Vec::new(),
            error: None,
        }
    }

    /// GET `url` and look for feed markers in the body.
    #[instrument(level = "debug", skip_all, fields(%url))]
    pub async fn validate_feed(&self, url: &str) -> bool {
        match self.fetcher.get(url, &self.profiles.validate()).await {
            Ok(resp) if resp.is_success() => looks_like_feed(&resp.body),
            Ok(resp) => {
                debug!(status = resp.status, "Feed validation got non-success status");
                false
            }
            Err(e) => {
                debug!(error = %e, "Feed validation failed");
                false
            }
        }
    }

    /// Feed URLs for the page at `url`: advertised `<link>` tags first, then
    /// conventional paths, then (when configured) the rendered page.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn find_feeds_in_page(&self, url: &str) -> Vec<String> {
        let Ok(base) = Url::parse(url) else {
            return Vec::new();
        };

        let advertised = self.feeds_in_static_html(url, &base).await;
        if !advertised.is_empty() {
            return advertised;
        }

        if let Some(found) = self.probe_common_paths(&base).await {
            return vec![found];
        }

        if let Some(renderer) = &self.renderer {
            match renderer.render(url).await {
                Ok(html) => {
                    let rendered = feed_links_in_html(&html, &base);
                    if !rendered.is_empty() {
                        info!(count = rendered.len(), "Rendered page advertises feeds");
                    }
                    return rendered;
                }
                Err(e) => warn!(error = %e, "Render fallback failed"),
            }
        }
        Vec::new()
    }

    async fn feeds_in_static_html(&self, url: &str, base: &Url) -> Vec<String> {
        match self.fetcher.get(url, &self.profiles.validate()).await {
            Ok(resp) if resp.is_success() => feed_links_in_html(&resp.body, base),
            Ok(resp) => {
                debug!(status = resp.status, "Page fetch returned non-success status");
                Vec::new()
            }
            Err(e) => {
                debug!(error = %e, "Page fetch failed");
                Vec::new()
            }
        }
    }

    /// First conventional path that answers HEAD with 2xx and serves a feed.
    async fn probe_common_paths(&self, base: &Url) -> Option<String> {
        let probe = self.profiles.probe();
        for path in COMMON_FEED_PATHS {
            let Ok(candidate) = base.join(path) else {
                continue;
            };
            let candidate = candidate.to_string();
            match self.fetcher.head(&candidate, &probe).await {
                Ok(status) if (200..300).contains(&status) => {
                    if self.validate_feed(&candidate).await {
                        info!(feed = %candidate, "Found feed at conventional path");
                        return Some(candidate);
                    }
                }
                Ok(_) => {}
                Err(e) => debug!(path, error = %e, "Probe failed"),
            }
        }
        None
    }
}
