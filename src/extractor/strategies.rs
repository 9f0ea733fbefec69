//! The individual link-harvesting heuristics.
//!
//! Each strategy is a plain function over a parsed document. None of them
//! know about the others: dedup, the result cap and the fallback cascade are
//! handled by [`super::extract`].

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::dates::extract_date;
use crate::models::ExtractStrategy;

static HEADINGS: Lazy<Selector> = Lazy::new(|| sel("h1, h2, h3"));
static ALL_HEADINGS: Lazy<Selector> = Lazy::new(|| sel("h1, h2, h3, h4, h5, h6"));
static LINKS: Lazy<Selector> = Lazy::new(|| sel("a[href]"));
static CONTAINERS: Lazy<Selector> = Lazy::new(|| sel("article[class], div[class]"));

static ASSET_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(jpg|png|gif|css|js|ico)$").expect("valid asset regex"));
static NAV_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(home|about|contact|login|signup|subscribe|menu|search)$")
        .expect("valid nav regex")
});

const CONTAINER_CLASS_HINTS: [&str; 5] = ["post", "article", "entry", "item", "card"];
const MIN_TITLE_CHARS: usize = 10;

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector must parse")
}

/// Page-level inputs shared by all strategies.
#[derive(Debug, Clone)]
pub struct PageContext {
    pub base: Url,
}

impl PageContext {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    fn resolve(&self, href: &str) -> Option<Url> {
        self.base.join(href).ok()
    }

    /// Same host, or a subdomain of it.
    fn is_same_site(&self, link: &Url) -> bool {
        match (self.base.host_str(), link.host_str()) {
            (Some(base), Some(host)) => {
                host.eq_ignore_ascii_case(base)
                    || host
                        .to_ascii_lowercase()
                        .ends_with(&format!(".{}", base.to_ascii_lowercase()))
            }
            _ => false,
        }
    }
}

/// One harvested link before dedup. `href` is the raw attribute value.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub href: String,
    pub link: String,
    pub title: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub strategy: ExtractStrategy,
}

pub type StrategyFn = fn(&Html, &PageContext) -> Vec<Candidate>;

/// Strategies in priority order.
pub const STRATEGIES: [(ExtractStrategy, StrategyFn); 4] = [
    (ExtractStrategy::HeadingLink, heading_link as StrategyFn),
    (ExtractStrategy::HeadingLinkReverse, heading_link_reverse as StrategyFn),
    (ExtractStrategy::GenericLink, generic_link as StrategyFn),
    (ExtractStrategy::ArticleContainer, article_container as StrategyFn),
];

fn text_of(el: &ElementRef<'_>) -> String {
    el.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

fn href_of<'a>(el: &ElementRef<'a>) -> Option<&'a str> {
    el.value().attr("href").map(str::trim).filter(|h| !h.is_empty())
}

/// `<h1-h3><a href>Title</a></h1-h3>`. No date is available at this level.
pub fn heading_link(doc: &Html, ctx: &PageContext) -> Vec<Candidate> {
    doc.select(&HEADINGS)
        .filter_map(|heading| {
            let anchor = heading.select(&LINKS).next()?;
            let href = href_of(&anchor)?;
            let title = text_of(&anchor);
            if title.is_empty() {
                return None;
            }
            let link = ctx.resolve(href)?;
            Some(Candidate {
                href: href.to_string(),
                link: link.to_string(),
                title,
                pub_date: None,
                strategy: ExtractStrategy::HeadingLink,
            })
        })
        .collect()
}

/// `<a href><div>...<h2>Title</h2></div></a>`, same site only.
pub fn heading_link_reverse(doc: &Html, ctx: &PageContext) -> Vec<Candidate> {
    doc.select(&LINKS)
        .filter_map(|anchor| {
            let href = href_of(&anchor)?;
            let heading = anchor.select(&HEADINGS).next()?;
            let title = text_of(&heading);
            if title.chars().count() <= MIN_TITLE_CHARS {
                return None;
            }
            let link = ctx.resolve(href)?;
            if !ctx.is_same_site(&link) {
                return None;
            }
            Some(Candidate {
                href: href.to_string(),
                link: link.to_string(),
                title,
                pub_date: extract_date(&anchor.inner_html()),
                strategy: ExtractStrategy::HeadingLinkReverse,
            })
        })
        .collect()
}

/// Text-only anchors that look like headlines, same site only.
pub fn generic_link(doc: &Html, ctx: &PageContext) -> Vec<Candidate> {
    doc.select(&LINKS)
        .filter(|anchor| anchor.children().all(|c| !c.value().is_element()))
        .filter_map(|anchor| {
            let href = href_of(&anchor)?;
            let title = text_of(&anchor);
            if title.chars().count() <= MIN_TITLE_CHARS
                || href.contains('#')
                || ASSET_SUFFIX.is_match(href)
                || NAV_LABEL.is_match(&title)
            {
                return None;
            }
            let link = ctx.resolve(href)?;
            if !ctx.is_same_site(&link) {
                return None;
            }
            Some(Candidate {
                href: href.to_string(),
                link: link.to_string(),
                title,
                pub_date: None,
                strategy: ExtractStrategy::GenericLink,
            })
        })
        .collect()
}

/// Blocks whose class names hint at a post card. The first link is the
/// article; a nested heading stands in when the link text is too short.
pub fn article_container(doc: &Html, ctx: &PageContext) -> Vec<Candidate> {
    doc.select(&CONTAINERS)
        .filter(|el| {
            el.value().attr("class").is_some_and(|class| {
                let class = class.to_ascii_lowercase();
                CONTAINER_CLASS_HINTS.iter().any(|hint| class.contains(hint))
            })
        })
        .filter_map(|container| {
            let anchor = container.select(&LINKS).next()?;
            let href = href_of(&anchor)?;
            let mut title = text_of(&anchor);
            if title.chars().count() < MIN_TITLE_CHARS {
                if let Some(heading) = container.select(&ALL_HEADINGS).next() {
                    title = text_of(&heading);
                }
            }
            if title.chars().count() <= MIN_TITLE_CHARS {
                return None;
            }
            let link = ctx.resolve(href)?;
            Some(Candidate {
                href: href.to_string(),
                link: link.to_string(),
                title,
                pub_date: extract_date(&container.inner_html()),
                strategy: ExtractStrategy::ArticleContainer,
            })
        })
        .collect()
}
