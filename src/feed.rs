//! RSS 2.0 / Atom / RSS 1.0 parsing.
//!
//! Feeds in the wild are frequently not well-formed XML (bare `&` in titles,
//! stray control characters), so bodies go through [`sanitize_xml`] before
//! they reach the quick-xml event loop.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;

use crate::error::{Error, Result};
use crate::extractor::parse_loose_date;

static KNOWN_ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:amp|lt|gt|quot|apos|#\d+|#x[0-9a-fA-F]+);").expect("valid entity regex")
});
static CONTROL_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").expect("valid control char regex")
});
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

const SNIPPET_CHARS: usize = 500;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub pub_date: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    /// Plain-text snippet of the description or content.
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub items: Vec<FeedItem>,
}

/// Cheap body check used before committing to a full parse.
pub fn looks_like_feed(body: &str) -> bool {
    ["<rss", "<feed", "</rss>", "</feed>"]
        .iter()
        .any(|marker| body.contains(marker))
}

/// Escape bare ampersands and drop control characters other than TAB, LF, CR.
pub fn sanitize_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 16);
    let mut rest = raw;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        if KNOWN_ENTITY.is_match(tail) {
            out.push('&');
        } else {
            out.push_str("&amp;");
        }
        rest = tail;
    }
    out.push_str(rest);
    CONTROL_CHARS.replace_all(&out, "").into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Published,
    Updated,
    Description,
    Content,
}

fn field_for(name: &str) -> Option<Field> {
    match name {
        "title" => Some(Field::Title),
        "link" => Some(Field::Link),
        "pubDate" | "published" | "dc:date" => Some(Field::Published),
        "updated" => Some(Field::Updated),
        "description" | "summary" => Some(Field::Description),
        "content:encoded" | "content" => Some(Field::Content),
        _ => None,
    }
}

fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
        .filter(|v| !v.is_empty())
}

fn qname(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// Collapse markup to a short plain-text snippet.
fn snippet(html: &str) -> Option<String> {
    let text = TAGS.replace_all(html, " ");
    let text: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(SNIPPET_CHARS).collect())
}

#[derive(Default)]
struct ItemBuilder {
    item: FeedItem,
    published: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
    description: Option<String>,
    content: Option<String>,
}

impl ItemBuilder {
    fn commit(&mut self, field: Field, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        match field {
            Field::Title => {
                if self.item.title.is_none() {
                    self.item.title = Some(text);
                }
            }
            Field::Link => {
                if self.item.link.is_none() {
                    self.item.link = Some(text);
                }
            }
            Field::Published => self.published = self.published.or(parse_loose_date(&text)),
            Field::Updated => self.updated = self.updated.or(parse_loose_date(&text)),
            Field::Description => self.description = Some(text),
            Field::Content => self.content = Some(text),
        }
    }

    /// Attribute-carried values: Atom links, enclosures, media thumbnails.
    fn absorb_element(&mut self, name: &str, e: &BytesStart<'_>) {
        match name {
            "link" => {
                let rel = attr(e, "rel");
                if self.item.link.is_none() && matches!(rel.as_deref(), None | Some("alternate")) {
                    self.item.link = attr(e, "href");
                }
            }
            "enclosure" | "media:content" | "media:thumbnail" => {
                if self.item.image_url.is_none() {
                    self.item.image_url = attr(e, "url");
                }
            }
            _ => {}
        }
    }

    fn finish(mut self) -> FeedItem {
        self.item.pub_date = self.published.or(self.updated);
        self.item.description = self
            .description
            .as_deref()
            .and_then(snippet)
            .or_else(|| self.content.as_deref().and_then(snippet));
        self.item
    }
}

/// Parse a feed body. Callers should pass the output of [`sanitize_xml`]
/// when the body comes from the network.
pub fn parse_feed(xml: &str) -> Result<ParsedFeed> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = ParsedFeed::default();
    let mut saw_root = false;
    let mut current: Option<ItemBuilder> = None;
    let mut field: Option<(Field, String)> = None;
    let mut buf = String::new();
    let mut channel_title: Option<String> = None;
    let mut in_channel_title = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = qname(&e);
                match name.as_str() {
                    "rss" | "feed" | "rdf:RDF" => saw_root = true,
                    "item" | "entry" => {
                        current = Some(ItemBuilder::default());
                        field = None;
                    }
                    _ => {}
                }
                // Atom `<source>` repeats the origin feed's metadata.
                if name == "source" && current.is_some() && field.is_none() {
                    reader.read_to_end(e.name()).map_err(|err| {
                        Error::Xml(format!("{err} at byte {}", reader.buffer_position()))
                    })?;
                    continue;
                }
                if let Some(item) = current.as_mut() {
                    if field.is_none() {
                        item.absorb_element(&name, &e);
                        if let Some(f) = field_for(&name) {
                            field = Some((f, name));
                            buf.clear();
                        }
                    }
                } else if name == "title" && channel_title.is_none() {
                    in_channel_title = true;
                    buf.clear();
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(item) = current.as_mut() {
                    item.absorb_element(&qname(&e), &e);
                }
            }
            Ok(Event::Text(e)) => {
                if field.is_some() || in_channel_title {
                    match e.unescape() {
                        Ok(text) => buf.push_str(&text),
                        Err(_) => buf.push_str(&String::from_utf8_lossy(&e)),
                    }
                }
            }
            Ok(Event::CData(e)) => {
                if field.is_some() || in_channel_title {
                    buf.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if in_channel_title && name == "title" {
                    in_channel_title = false;
                    let t = buf.trim();
                    if !t.is_empty() {
                        channel_title = Some(t.to_string());
                    }
                    buf.clear();
                } else if field.as_ref().is_some_and(|(_, tag)| *tag == name) {
                    if let (Some((f, _)), Some(item)) = (field.take(), current.as_mut()) {
                        item.commit(f, std::mem::take(&mut buf));
                    }
                } else if field.is_none() && (name == "item" || name == "entry") {
                    if let Some(item) = current.take() {
                        feed.items.push(item.finish());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Xml(format!(
                    "{e} at byte {}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(Error::Xml("document is not an RSS or Atom feed".into()));
    }
    feed.title = channel_title;
    Ok(feed)
}
