//! Outbound HTTP seams.
//!
//! Every component that touches the network goes through [`Fetcher`] (plain
//! GET/HEAD) or [`PageRenderer`] (a remote headless-browser service), so the
//! detection, testing and collection logic runs unchanged against the
//! in-memory fakes used by the unit tests.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::config::{HttpConfig, RenderConfig};
use crate::error::{Error, Result};

/// Per-request knobs. Each call site picks its own timeout and user agent.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub user_agent: String,
    pub timeout: Duration,
}

impl FetchOptions {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into [`Error::HttpStatus`].
    pub fn into_body(self, url: &str) -> Result<String> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(Error::HttpStatus {
                status: self.status,
                url: url.to_string(),
            })
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url`. Non-2xx statuses are returned, not raised; transport
    /// failures and timeouts are errors.
    async fn get(&self, url: &str, opts: &FetchOptions) -> Result<FetchResponse>;

    /// HEAD `url` and return the status code.
    async fn head(&self, url: &str, opts: &FetchOptions) -> Result<u16>;
}

/// [`Fetcher`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn get(&self, url: &str, opts: &FetchOptions) -> Result<FetchResponse> {
        let t0 = Instant::now();
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &opts.user_agent)
            .timeout(opts.timeout)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        debug!(
            status,
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "GET finished"
        );
        Ok(FetchResponse { status, body })
    }

    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn head(&self, url: &str, opts: &FetchOptions) -> Result<u16> {
        let resp = self
            .client
            .head(url)
            .header(reqwest::header::USER_AGENT, &opts.user_agent)
            .timeout(opts.timeout)
            .send()
            .await?;
        Ok(resp.status().as_u16())
    }
}

/// Named fetch profiles built from [`HttpConfig`].
#[derive(Debug, Clone)]
pub struct FetchProfiles {
    cfg: HttpConfig,
}

impl FetchProfiles {
    pub fn new(cfg: HttpConfig) -> Self {
        Self { cfg }
    }

    pub fn probe(&self) -> FetchOptions {
        FetchOptions::new(&self.cfg.bot_user_agent, self.cfg.probe_timeout())
    }

    pub fn validate(&self) -> FetchOptions {
        FetchOptions::new(&self.cfg.bot_user_agent, self.cfg.validate_timeout())
    }

    pub fn rss_test(&self) -> FetchOptions {
        FetchOptions::new(&self.cfg.bot_user_agent, self.cfg.test_timeout())
    }

    pub fn web_test(&self) -> FetchOptions {
        FetchOptions::new(&self.cfg.browser_user_agent, self.cfg.test_timeout())
    }

    pub fn rss_collect(&self) -> FetchOptions {
        FetchOptions::new(&self.cfg.bot_user_agent, self.cfg.rss_collect_timeout())
    }

    pub fn web_collect(&self) -> FetchOptions {
        FetchOptions::new(&self.cfg.browser_user_agent, self.cfg.web_collect_timeout())
    }
}

impl Default for FetchProfiles {
    fn default() -> Self {
        Self::new(HttpConfig::default())
    }
}

/// Remote rendering for pages that only expose their markup after scripts run.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: [&'a str; 1],
    only_main_content: bool,
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    data: Option<ScrapeData>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    html: Option<String>,
}

/// [`PageRenderer`] for Firecrawl's `/v1/scrape` endpoint.
#[derive(Clone)]
pub struct FirecrawlRenderer {
    client: Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
    page_timeout_ms: u64,
}

impl FirecrawlRenderer {
    pub fn new(cfg: &RenderConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: cfg.endpoint.clone(),
            api_key: api_key.into(),
            timeout: Duration::from_millis(cfg.timeout_ms),
            page_timeout_ms: cfg.page_timeout_ms,
        })
    }
}

impl fmt::Debug for FirecrawlRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirecrawlRenderer")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl PageRenderer for FirecrawlRenderer {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn render(&self, url: &str) -> Result<String> {
        let body = ScrapeRequest {
            url,
            formats: ["html"],
            only_main_content: false,
            timeout: self.page_timeout_ms,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Render request rejected");
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: self.endpoint.clone(),
            });
        }

        let parsed: ScrapeResponse = resp.json().await?;
        match parsed.data.and_then(|d| d.html) {
            Some(html) if parsed.success => Ok(html),
            _ => Err(Error::Render(
                parsed
                    .error
                    .unwrap_or_else(|| "renderer returned no html".to_string()),
            )),
        }
    }
}
