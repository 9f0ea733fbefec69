//! Runtime configuration loaded from an optional YAML file.
//!
//! Every field has a default, so an empty or missing file yields a working
//! configuration. Secrets are never read from YAML; the CLI passes them in
//! from the environment (`ORACLE_API_KEY`, `RENDER_API_KEY`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

use crate::error::Result;

pub const BOT_USER_AGENT: &str = "Mozilla/5.0 (compatible; TechNewsBot/1.0)";
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// JSON snapshot file backing the store. `None` keeps everything in memory.
    pub store_path: Option<String>,
    /// YAML file with prompt template overrides.
    pub prompts_path: Option<String>,
    pub http: HttpConfig,
    pub extractor: ExtractorConfig,
    pub date_gate: DateGateConfig,
    pub filter: FilterConfig,
    pub trending: TrendingConfig,
    pub translation: TranslationConfig,
    pub retention: RetentionConfig,
    pub oracle: OracleConfig,
    pub render: RenderConfig,
}

impl AppConfig {
    /// Load from `path`, or return defaults when no path was given.
    #[instrument(level = "info", skip_all)]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)?;
        let cfg: AppConfig = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&raw)?
        };
        info!(path = %path.display(), "Loaded configuration");
        Ok(cfg)
    }
}

/// Timeouts in milliseconds and user agents for each kind of fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub probe_timeout_ms: u64,
    pub validate_timeout_ms: u64,
    pub test_timeout_ms: u64,
    pub rss_collect_timeout_ms: u64,
    pub web_collect_timeout_ms: u64,
    pub bot_user_agent: String,
    pub browser_user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 3_000,
            validate_timeout_ms: 5_000,
            test_timeout_ms: 10_000,
            rss_collect_timeout_ms: 15_000,
            web_collect_timeout_ms: 10_000,
            bot_user_agent: BOT_USER_AGENT.to_string(),
            browser_user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

impl HttpConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
    pub fn validate_timeout(&self) -> Duration {
        Duration::from_millis(self.validate_timeout_ms)
    }
    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }
    pub fn rss_collect_timeout(&self) -> Duration {
        Duration::from_millis(self.rss_collect_timeout_ms)
    }
    pub fn web_collect_timeout(&self) -> Duration {
        Duration::from_millis(self.web_collect_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Later strategies run only while fewer results than this were found.
    pub fallback_threshold: usize,
    pub max_articles: usize,
    /// Items kept from one feed during collection.
    pub max_feed_items: usize,
    /// Items shown by the testers.
    pub preview_limit: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            fallback_threshold: 5,
            max_articles: 50,
            max_feed_items: 50,
            preview_limit: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateGateConfig {
    /// A pubDate this close to "now" counts as a substituted fallback.
    pub fallback_window_secs: i64,
    /// Maximum tolerated share of fallback dates.
    pub max_fallback_ratio: f64,
}

impl Default for DateGateConfig {
    fn default() -> Self {
        Self {
            fallback_window_secs: 60,
            max_fallback_ratio: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendingConfig {
    pub max_articles: usize,
    pub max_topics: usize,
    pub min_sources: usize,
}

impl Default for TrendingConfig {
    fn default() -> Self {
        Self {
            max_articles: 200,
            max_topics: 10,
            min_sources: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    pub enabled: bool,
    pub concurrency: usize,
    pub group_delay_ms: u64,
    pub target_language: String,
    /// Share of CJK characters above which a title counts as already translated.
    pub skip_ratio: f64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 2,
            group_delay_ms: 500,
            target_language: "Simplified Chinese".to_string(),
            skip_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { days: 7 }
    }
}

/// Upper bound on a single oracle call. A call that fails is not repeated;
/// its articles wait for the next cycle.
pub const MAX_ORACLE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub base_url: String,
    pub model: String,
    /// Clamped to [`MAX_ORACLE_TIMEOUT`].
    pub timeout_ms: u64,
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms).min(MAX_ORACLE_TIMEOUT)
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
    /// Milliseconds the renderer may spend on the page itself.
    pub page_timeout_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.firecrawl.dev/v1/scrape".to_string(),
            timeout_ms: 15_000,
            page_timeout_ms: 10_000,
        }
    }
}
