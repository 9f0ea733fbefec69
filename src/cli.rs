//! Command-line interface definitions for trendwire.
//!
//! Every command prints its result as pretty JSON on stdout. Logs go to
//! stderr, filtered by `RUST_LOG`.

use clap::{Args, Parser, Subcommand};

use crate::models::{HotTopicWindow, ScrapeConfig, SourceType};
use crate::sources::SourceFilter;

/// Tech news aggregation: source onboarding, collection, relevance
/// filtering, translation and hot topics.
///
/// # Examples
///
/// ```sh
/// # Onboard a site
/// trendwire detect https://www.theverge.com/
/// trendwire source add --name "The Verge" --url https://www.theverge.com/rss/index.xml --category tech --type rss
/// trendwire source test <id>
/// trendwire source activate <id>
///
/// # One scheduled cycle
/// ORACLE_API_KEY=... trendwire run
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to config.yaml file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// JSON snapshot file backing the store
    #[arg(long, global = true, env = "TRENDWIRE_STORE")]
    pub store: Option<String>,

    /// API key for the chat-completions oracle
    #[arg(long, env = "ORACLE_API_KEY", hide_env_values = true)]
    pub oracle_api_key: Option<String>,

    /// API key for the page rendering service (enables the render fallback)
    #[arg(long, env = "RENDER_API_KEY", hide_env_values = true)]
    pub render_api_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classify a URL as rss or web and suggest feeds
    Detect { url: String },

    /// Find and rate every feed a site offers
    Discover { url: String },

    /// Dry-run a collection path without saving anything
    Probe {
        url: String,
        #[arg(long = "type", default_value = "rss")]
        source_type: SourceType,
        #[command(flatten)]
        patterns: PatternArgs,
    },

    /// Manage sources
    #[command(subcommand)]
    Source(SourceCommand),

    /// Collect new articles from every active source
    Collect,

    /// Re-run the relevance filter over recent articles
    Filter {
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },

    /// Translate pending titles
    Translate,

    /// Recompute and store hot topics for a window
    Trending {
        #[arg(long, default_value = "24h")]
        window: HotTopicWindow,
    },

    /// Show stored hot topics for a window
    Topics {
        #[arg(long, default_value = "24h")]
        window: HotTopicWindow,
    },

    /// Run one full cycle: retention, collect, filter, translate, hot topics
    Run,
}

#[derive(Subcommand, Debug)]
pub enum SourceCommand {
    /// Register a new (untested, inactive) source
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        category: String,
        #[arg(long = "type")]
        source_type: SourceType,
        #[command(flatten)]
        patterns: PatternArgs,
    },

    /// List sources
    List {
        #[arg(long, default_value = "all")]
        filter: SourceFilter,
    },

    /// Edit a source; changing url, type or patterns resets its test
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long = "type")]
        source_type: Option<SourceType>,
        #[command(flatten)]
        patterns: PatternArgs,
        /// Drop the scrape config entirely
        #[arg(long, conflicts_with_all = ["include", "exclude"])]
        clear_patterns: bool,
    },

    /// Delete a source
    Remove { id: String },

    /// Find a working collection path and record the result
    Test { id: String },

    /// Activate a successfully tested source
    Activate { id: String },

    /// Deactivate a source
    Deactivate { id: String },
}

/// Link substring filters for web scraping.
#[derive(Args, Debug, Clone, Default)]
pub struct PatternArgs {
    /// Keep only links containing one of these
    #[arg(long = "include")]
    pub include: Vec<String>,

    /// Drop links containing any of these
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,
}

impl PatternArgs {
    /// `None` when no pattern was given.
    pub fn into_config(self) -> Option<ScrapeConfig> {
        if self.include.is_empty() && self.exclude.is_empty() {
            return None;
        }
        Some(ScrapeConfig {
            include_patterns: self.include,
            exclude_patterns: self.exclude,
        })
    }
}
