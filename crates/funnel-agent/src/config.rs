//! Agent configuration: TOML file plus command-line overrides

use std::path::{Path, PathBuf};

use clap::Parser;
use funnel_events::{PageContext, QueueConfig};
use funnel_logging::LogConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(
    name = "funnel-agent",
    about = "Forward funnel events from JSON lines to the analytics-batch endpoint"
)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Read events from this file instead of stdin
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Batch ingestion endpoint
    #[arg(long)]
    pub endpoint: Option<String>,

    /// API key sent as bearer token and `apikey` header
    #[arg(long, env = "FUNNEL_API_KEY")]
    pub api_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Human-readable console logs instead of JSONL
    #[arg(long)]
    pub pretty: bool,

    /// Page URL stamped on every record
    #[arg(long)]
    pub page_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Everything the agent needs, as loaded from `funnel-agent.toml`
///
/// ```toml
/// api_key = "anon-key"
///
/// [queue]
/// endpoint_url = "https://project.supabase.co/functions/v1/analytics-batch"
/// batch_size = 10
/// flush_interval_ms = 5000
///
/// [page]
/// page_url = "https://exemple.ca/quiz"
/// referrer = "https://google.com"
///
/// [logging]
/// default_level = "info"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub api_key: Option<String>,
    pub queue: QueueConfig,
    pub page: PageContext,
    pub logging: LogConfig,
}

impl AgentConfig {
    pub fn from_toml_str(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents, path)
    }

    /// Resolve the configuration for a command line: file first, flags on top
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(cli);
        Ok(config)
    }

    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(endpoint) = &cli.endpoint {
            self.queue.endpoint_url = endpoint.clone();
        }
        if let Some(api_key) = &cli.api_key {
            self.api_key = Some(api_key.clone());
        }
        if let Some(level) = &cli.log_level {
            self.logging.default_level = level.clone();
        }
        if cli.pretty {
            self.logging.console.pretty = true;
        }
        if let Some(page_url) = &cli.page_url {
            self.page.page_url = page_url.clone();
        }
    }
}
