//! HTML article extraction.
//!
//! Turns an arbitrary listing page into [`CollectedArticle`]s by running the
//! heuristics in [`strategies::STRATEGIES`] in priority order. A strategy is
//! only consulted while fewer than `fallback_threshold` articles have been
//! accumulated, links are deduplicated by their raw `href` across strategies,
//! and the output is capped at `max_articles`.
//!
//! Articles without a recoverable date get the extraction time as `pub_date`;
//! the web tester's date-quality gate relies on that.

pub mod dates;
pub mod strategies;

use chrono::Utc;
use scraper::Html;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

use crate::config::ExtractorConfig;
use crate::error::Result;
use crate::models::{CollectedArticle, ScrapeConfig};
use strategies::{PageContext, STRATEGIES};

pub use dates::parse_loose_date;

/// Extract article candidates from `html`, then apply the include/exclude
/// filters from `filters`.
///
/// # Errors
///
/// Only when `base_url` is not an absolute URL.
pub fn extract(
    html: &str,
    base_url: &str,
    filters: Option<&ScrapeConfig>,
    cfg: &ExtractorConfig,
) -> Result<Vec<CollectedArticle>> {
    let ctx = PageContext::new(Url::parse(base_url)?);
    let doc = Html::parse_document(html);
    let now = Utc::now();

    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<CollectedArticle> = Vec::new();

    for (strategy, run) in STRATEGIES {
        if !out.is_empty() && out.len() >= cfg.fallback_threshold {
            break;
        }
        let before = out.len();
        for candidate in run(&doc, &ctx) {
            if out.len() >= cfg.max_articles {
                break;
            }
            if !seen.insert(candidate.href.clone()) {
                continue;
            }
            out.push(CollectedArticle {
                title: candidate.title,
                link: candidate.link,
                pub_date: candidate.pub_date.unwrap_or(now),
                image_url: None,
                description: None,
                extract_strategy: Some(candidate.strategy),
            });
        }
        debug!(?strategy, added = out.len() - before, total = out.len(), "Strategy finished");
    }

    if let Some(filters) = filters {
        out.retain(|a| filters.allows(&a.link));
    }
    Ok(out)
}
