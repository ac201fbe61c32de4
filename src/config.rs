use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::tagger::{default_topics, TopicConfig};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Ingestion interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Per-feed HTTP timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,
    /// Pause between publications within a run, in milliseconds
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    /// Delay before the first ingestion run after startup, in seconds
    #[serde(default = "default_startup_delay")]
    pub startup_delay: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Hour of day (UTC) at which the retention sweep runs
    #[serde(default = "default_cleanup_hour")]
    pub cleanup_hour: u32,
    #[serde(default)]
    pub publications: Vec<PublicationConfig>,
    #[serde(default = "default_topics")]
    pub topics: Vec<TopicConfig>,
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_fetch_timeout() -> u64 {
    15
}

fn default_request_delay_ms() -> u64 {
    1000
}

fn default_startup_delay() -> u64 {
    5
}

fn default_retention_days() -> i64 {
    90
}

fn default_cleanup_hour() -> u32 {
    2
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublicationConfig {
    pub name: String,
    pub url: String,
    pub website_url: Option<String>,
    pub logo_url: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RSS_UPDATE_INTERVAL` (minutes) if set.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(value) = std::env::var("RSS_UPDATE_INTERVAL") {
            self.refresh_interval = value.trim().parse().map_err(|e| {
                anyhow::anyhow!("invalid RSS_UPDATE_INTERVAL '{}': {}", value, e)
            })?;
        }
        self.validate()
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.refresh_interval == 0 {
            anyhow::bail!("refresh_interval must be at least 1 minute");
        }
        if self.cleanup_hour > 23 {
            anyhow::bail!("cleanup_hour must be between 0 and 23");
        }
        if self.fetch_timeout == 0 {
            anyhow::bail!("fetch_timeout must be at least 1 second");
        }
        if !(1..=36500).contains(&self.retention_days) {
            anyhow::bail!("retention_days must be between 1 and 36500");
        }
        Ok(())
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(self.fetch_timeout),
            ..FetchConfig::default()
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            request_delay: Duration::from_millis(self.request_delay_ms),
            retention_days: self.retention_days,
        }
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_interval * 60)
    }
}

/// HTTP settings for feed fetching.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub accept: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(default_fetch_timeout()),
            user_agent: "NewsHub RSS Aggregator/1.0".to_string(),
            accept: "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub request_delay: Duration,
    pub retention_days: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(default_request_delay_ms()),
            retention_days: default_retention_days(),
        }
    }
}
