//! Prompt templates for every oracle-backed stage.
//!
//! Templates are looked up by key. The built-in set can be overridden per key
//! from a YAML file, which is re-read once the cache entry expires so edits
//! take effect without a restart.
//!
//! ```yaml
//! prompts:
//!   - key: content_filter
//!     name: Relevance filter
//!     systemPrompt: You filter tech news.
//!     userPromptTemplate: "Articles:\n{{articleList}}"
//!     temperature: 0.2
//!     jsonMode: true
//!     version: 2
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::oracle::OracleRequest;

pub const RSS_ANALYSIS: &str = "rss_analysis";
pub const CONTENT_FILTER: &str = "content_filter";
pub const TRENDING_ANALYSIS: &str = "trending_analysis";
pub const TITLE_TRANSLATION: &str = "title_translation";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplate {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    pub user_prompt_template: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub json_mode: bool,
    #[serde(default = "first_version")]
    pub version: u32,
}

fn first_version() -> u32 {
    1
}

impl PromptTemplate {
    /// Render the user template with `vars` and wrap it as an oracle request.
    pub fn request(&self, vars: &[(&str, &str)]) -> OracleRequest {
        OracleRequest {
            system_prompt: self.system_prompt.clone(),
            user_prompt: render(&self.user_prompt_template, vars),
            temperature: self.temperature,
            json_mode: self.json_mode,
        }
    }
}

/// Replace every literal `{{name}}` with its value. Values are not escaped
/// and unknown placeholders are left as they are.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{{{name}}}}}"), value)
    })
}

/// Key-value cache in front of the template source.
pub trait PromptCache: Send + Sync {
    fn get(&self, key: &str) -> Option<PromptTemplate>;
    fn set(&self, template: PromptTemplate);
}

/// [`PromptCache`] whose entries expire after a fixed time-to-live.
pub struct TtlCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, PromptTemplate)>>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl PromptCache for TtlCache {
    fn get(&self, key: &str) -> Option<PromptTemplate> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some((stored, t)) if stored.elapsed() < self.ttl => Some(t.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, template: PromptTemplate) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(template.key.clone(), (Instant::now(), template));
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PromptFile {
    #[serde(default)]
    prompts: Vec<PromptTemplate>,
}

/// Resolves templates: cache, then the override file, then the built-ins.
pub struct PromptLoader {
    overrides: Option<PathBuf>,
    cache: Arc<dyn PromptCache>,
}

impl PromptLoader {
    pub fn new(overrides: Option<PathBuf>, cache: Arc<dyn PromptCache>) -> Self {
        Self { overrides, cache }
    }

    /// Built-ins only, cached with the default TTL.
    pub fn builtin() -> Self {
        Self::new(None, Arc::new(TtlCache::default()))
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn load(&self, key: &str) -> Result<PromptTemplate> {
        if let Some(hit) = self.cache.get(key) {
            debug!(version = hit.version, "Prompt cache hit");
            return Ok(hit);
        }

        let template = match self.from_file(key).await? {
            Some(t) => t,
            None => builtin(key).ok_or_else(|| Error::PromptNotFound(key.to_string()))?,
        };
        info!(key, version = template.version, "Loaded prompt");
        self.cache.set(template.clone());
        Ok(template)
    }

    async fn from_file(&self, key: &str) -> Result<Option<PromptTemplate>> {
        let Some(path) = &self.overrides else {
            return Ok(None);
        };
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Prompt override file missing, using built-ins");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let file: PromptFile = if raw.trim().is_empty() {
            PromptFile::default()
        } else {
            serde_yaml::from_str(&raw)?
        };
        Ok(file.prompts.into_iter().find(|p| p.key == key))
    }
}

/// Every built-in template.
pub fn builtin_prompts() -> Vec<PromptTemplate> {
    [RSS_ANALYSIS, CONTENT_FILTER, TRENDING_ANALYSIS, TITLE_TRANSLATION]
        .into_iter()
        .filter_map(builtin)
        .collect()
}

pub fn builtin(key: &str) -> Option<PromptTemplate> {
    let (name, description, system, user) = match key {
        RSS_ANALYSIS => (
            "Feed analysis",
            "Classify a feed from a sample of its titles",
            "You classify news feeds and are an expert at recognising technology, AI and internet coverage.",
            RSS_ANALYSIS_USER,
        ),
        CONTENT_FILTER => (
            "Relevance filter",
            "Flag articles unrelated to technology, AI or the internet business",
            "You filter technology news and are an expert at recognising technology, AI, internet and business stories.",
            CONTENT_FILTER_USER,
        ),
        TRENDING_ANALYSIS => (
            "Hot topic clustering",
            "Group reports of the same event and surface the most discussed ones",
            "You are a news analyst who spots trending topics and groups reports of the same story.",
            TRENDING_ANALYSIS_USER,
        ),
        TITLE_TRANSLATION => (
            "Title translation",
            "Translate one headline",
            "You are a professional technology news translator. Reply with the translated headline only.",
            TITLE_TRANSLATION_USER,
        ),
        _ => return None,
    };
    Some(PromptTemplate {
        key: key.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        system_prompt: system.to_string(),
        user_prompt_template: user.to_string(),
        temperature: Some(0.3),
        json_mode: key != TITLE_TRANSLATION,
        version: 1,
    })
}

const RSS_ANALYSIS_USER: &str = r#"Analyse the {{count}} article titles sampled from this feed.

Feed URL: {{feedUrl}}
Titles:
{{titles}}

Return JSON:

{
  "feedType": "specific" | "general",
  "category": "AI" | "General Tech" | "Consumer Tech" | "Internet/Startups" | "General News" | "Other",
  "techRelevance": 0-100,
  "aiRelevance": 0-100,
  "confidence": 0-100,
  "recommendation": "strongly_recommend" | "recommend" | "caution" | "not_recommend",
  "reasoning": "one or two sentences"
}

Notes:
- feedType: specific when 90% or more of the titles belong to AI or technology, general otherwise
- techRelevance: share of technology and internet titles
- aiRelevance: share of AI and machine learning titles
- recommendation:
  * strongly_recommend: dedicated tech or AI section (techRelevance + aiRelevance > 80)
  * recommend: technology outlet, whole site (techRelevance + aiRelevance > 60)
  * caution: general outlet with some tech coverage (30 to 60)
  * not_recommend: not a technology outlet (< 30)"#;

const CONTENT_FILTER_USER: &str = r#"Decide for each article whether its subject is relevant. Judge the topic, not isolated keywords.

Keep when any of these holds:
- AI products, applications or companies
- products, business, strategy or investment of technology and internet companies
- technology, programming and software development
- coverage of tech products, even when it mentions prices or sales
- investment, M&A and stock news in the tech and internet sector
- natural science research

Remove only when the subject itself is:
- pure e-commerce promotion (shopping festivals, flash sales)
- travel statistics (passenger numbers, holiday trips)
- entertainment consumption (box office, concerts, variety shows)
- traditional retail, dining or fashion
- sports, politics or general society news

A price or the word "buy" alone is not a reason to remove:
- keep "AI gadget sells for $700", the subject is an AI product
- keep "Buffett trims tech holdings", the subject is investment
- remove "Travel site reports record holiday spending", the subject is travel consumption

Articles:
{{articleList}}

Return JSON:
{
  "irrelevant": [indexes of articles to remove],
  "reasoning": "short explanation"
}"#;

const TRENDING_ANALYSIS_USER: &str = r#"Find the hot topics of the last {{hours}} hours in the headlines below.

Rules:
1. Only return topics reported by at least 2 different sources
2. Group different reports of the same event together
3. Treat semantically similar headlines as one topic
4. Order by how widely discussed the topic is (sources x reports)
5. Return at most 15 topics

Headlines:
{{articleList}}

Return only JSON, nothing else:
{
  "hotTopics": [
    {
      "topic": "short topic summary",
      "articleIndexes": [0, 5, 12],
      "sources": ["TechCrunch", "The Verge"]
    }
  ]
}"#;

const TITLE_TRANSLATION_USER: &str = "Translate this headline into {{targetLanguage}}. Keep product and company names as they are.\n\n{{title}}";
