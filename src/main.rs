//! # trendwire
//!
//! A tech news aggregation pipeline. Sources (RSS feeds or plain web pages)
//! are onboarded through detection and a dry-run test, then polled on a
//! schedule. New articles pass through an LLM relevance filter, get their
//! titles translated, and are clustered into ranked hot topics.
//!
//! ## Usage
//!
//! ```sh
//! trendwire detect https://arstechnica.com/
//! trendwire source add --name Ars --url https://arstechnica.com/feed/ --category tech --type rss
//! trendwire run
//! ```
//!
//! ## Architecture
//!
//! One cycle runs:
//! 1. **Retention**: drop articles and denylist rows older than a week
//! 2. **Collection**: poll every active source, insert unseen links
//! 3. **Filtering**: ask the oracle which new articles are off-topic
//! 4. **Translation**: translate pending titles
//! 5. **Hot topics**: cluster the last 48 h and 24 h of headlines

use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod collector;
mod config;
mod detector;
mod discovery;
mod error;
mod extractor;
mod feed;
mod filter;
mod http;
mod models;
mod oracle;
mod pipeline;
mod prompts;
mod sources;
mod store;
mod testers;
mod translate;
mod trending;
mod utils;

#[cfg(test)]
mod test_support;

use cli::{Cli, Command, SourceCommand};
use collector::Collector;
use config::AppConfig;
use detector::Detector;
use discovery::Discovery;
use error::{Error, Result};
use filter::RelevanceFilter;
use http::{FetchProfiles, Fetcher, FirecrawlRenderer, HttpFetcher, PageRenderer};
use models::{NewSource, SourceUpdate};
use oracle::{ChatCompletionsOracle, Oracle};
use pipeline::Pipeline;
use prompts::{PromptLoader, TtlCache};
use sources::SourceService;
use store::{MemoryStore, NewsStore};
use testers::Testers;
use translate::{OracleTranslator, TitleTranslation};
use trending::TrendingAnalyzer;

const DEFAULT_STORE_PATH: &str = "data/trendwire.json";

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn StdError>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();
    debug!(command = ?args.command, "Parsed CLI arguments");

    let cfg = AppConfig::load(args.config.as_deref().map(Path::new))?;
    let app = match App::build(&args, cfg).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };

    let output = match app.dispatch(args.command).await {
        Ok(output) => output,
        Err(e) => {
            error!(error = %e, "Command failed");
            return Err(e.into());
        }
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    info!(elapsed_ms = start_time.elapsed().as_millis() as u64, "Done");
    Ok(())
}

/// Shared components, built once per invocation. Oracle-backed stages are
/// built on demand so commands that never call the oracle run without a key.
struct App {
    cfg: AppConfig,
    store: Arc<dyn NewsStore>,
    fetcher: Arc<dyn Fetcher>,
    profiles: FetchProfiles,
    detector: Arc<Detector>,
    testers: Arc<Testers>,
    prompts: Arc<PromptLoader>,
    oracle_api_key: Option<String>,
}

impl App {
    #[instrument(level = "info", skip_all)]
    async fn build(args: &Cli, cfg: AppConfig) -> Result<Self> {
        let store_path = args
            .store
            .clone()
            .or_else(|| cfg.store_path.clone())
            .unwrap_or_else(|| DEFAULT_STORE_PATH.to_string());
        let store: Arc<dyn NewsStore> = Arc::new(MemoryStore::open(Path::new(&store_path)).await?);

        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new()?);
        let profiles = FetchProfiles::new(cfg.http.clone());
        let renderer: Option<Arc<dyn PageRenderer>> = match &args.render_api_key {
            Some(key) => Some(Arc::new(FirecrawlRenderer::new(&cfg.render, key.clone())?)),
            None => {
                debug!("No render key; detection skips the rendered-page fallback");
                None
            }
        };

        let detector = Arc::new(Detector::new(fetcher.clone(), renderer, profiles.clone()));
        let testers = Arc::new(Testers::new(
            fetcher.clone(),
            profiles.clone(),
            cfg.extractor.clone(),
            cfg.date_gate.clone(),
        ));
        let prompts = Arc::new(PromptLoader::new(
            cfg.prompts_path.as_ref().map(PathBuf::from),
            Arc::new(TtlCache::default()),
        ));

        info!(store = %store_path, "Components ready");
        Ok(Self {
            cfg,
            store,
            fetcher,
            profiles,
            detector,
            testers,
            prompts,
            oracle_api_key: args.oracle_api_key.clone(),
        })
    }

    fn oracle(&self) -> Result<Arc<dyn Oracle>> {
        let key = self
            .oracle_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("ORACLE_API_KEY is not set".into()))?;
        Ok(Arc::new(ChatCompletionsOracle::new(&self.cfg.oracle, key)?))
    }

    fn sources(&self) -> SourceService {
        SourceService::new(self.store.clone(), self.detector.clone(), self.testers.clone())
    }

    fn collector(&self) -> Collector {
        Collector::new(
            self.store.clone(),
            self.fetcher.clone(),
            self.profiles.clone(),
            self.cfg.extractor.clone(),
        )
    }

    fn relevance_filter(&self, oracle: Arc<dyn Oracle>) -> RelevanceFilter {
        RelevanceFilter::new(
            self.store.clone(),
            oracle,
            self.prompts.clone(),
            self.cfg.filter.clone(),
        )
    }

    fn trending(&self, oracle: Arc<dyn Oracle>) -> TrendingAnalyzer {
        TrendingAnalyzer::new(
            self.store.clone(),
            oracle,
            self.prompts.clone(),
            self.cfg.trending.clone(),
        )
    }

    fn translation(&self, oracle: Arc<dyn Oracle>) -> TitleTranslation {
        let translator = OracleTranslator::new(
            oracle,
            self.prompts.clone(),
            &self.cfg.translation.target_language,
        );
        TitleTranslation::new(
            self.store.clone(),
            Arc::new(translator),
            self.cfg.translation.clone(),
        )
    }

    fn pipeline(&self) -> Result<Pipeline> {
        let oracle = self.oracle()?;
        let pipeline = Pipeline::new(
            self.store.clone(),
            Arc::new(self.collector()),
            Arc::new(self.relevance_filter(oracle.clone())),
            Arc::new(self.trending(oracle.clone())),
            self.cfg.retention.clone(),
        );
        Ok(if self.cfg.translation.enabled {
            pipeline.with_translation(Arc::new(self.translation(oracle)))
        } else {
            warn!("Translation disabled in config");
            pipeline
        })
    }

    async fn dispatch(&self, command: Command) -> Result<Value> {
        match command {
            Command::Detect { url } => to_json(&self.detector.detect(&url).await),
            Command::Discover { url } => {
                let discovery = Discovery::new(
                    self.detector.clone(),
                    self.fetcher.clone(),
                    self.profiles.clone(),
                    self.oracle()?,
                    self.prompts.clone(),
                );
                to_json(&discovery.discover(&url).await)
            }
            Command::Probe {
                url,
                source_type,
                patterns,
            } => {
                let config = patterns.into_config();
                to_json(&self.sources().probe(&url, source_type, config.as_ref()).await?)
            }
            Command::Source(cmd) => self.dispatch_source(cmd).await,
            Command::Collect => to_json(&self.collector().collect_all_active_sources().await?),
            Command::Filter { hours } => to_json(&self.pipeline()?.filter_recent(hours).await?),
            Command::Translate => {
                to_json(&self.translation(self.oracle()?).translate_pending().await?)
            }
            Command::Trending { window } => {
                to_json(&self.trending(self.oracle()?).refresh_hot_topics(window).await?)
            }
            Command::Topics { window } => to_json(&self.store.hot_topics(window).await?),
            Command::Run => to_json(&self.pipeline()?.run_cycle().await),
        }
    }

    async fn dispatch_source(&self, cmd: SourceCommand) -> Result<Value> {
        let sources = self.sources();
        match cmd {
            SourceCommand::Add {
                name,
                url,
                category,
                source_type,
                patterns,
            } => to_json(
                &sources
                    .create_source(NewSource {
                        url,
                        name,
                        category,
                        source_type,
                        scrape_config: patterns.into_config(),
                    })
                    .await?,
            ),
            SourceCommand::List { filter } => to_json(&sources.list_sources(filter).await?),
            SourceCommand::Update {
                id,
                name,
                url,
                category,
                source_type,
                patterns,
                clear_patterns,
            } => {
                let scrape_config = if clear_patterns {
                    Some(None)
                } else {
                    patterns.into_config().map(Some)
                };
                let update = SourceUpdate {
                    name,
                    url,
                    category,
                    source_type,
                    scrape_config,
                };
                to_json(&sources.update_source(&id, update).await?)
            }
            SourceCommand::Remove { id } => {
                sources.delete_source(&id).await?;
                Ok(serde_json::json!({ "deleted": id }))
            }
            SourceCommand::Test { id } => to_json(&sources.test_source(&id).await?),
            SourceCommand::Activate { id } => to_json(&sources.set_active(&id, true).await?),
            SourceCommand::Deactivate { id } => to_json(&sources.set_active(&id, false).await?),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
