//! Environment + `bidcast.yaml` configuration.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use bidcast_adapters::{
    default_endpoints, BidEndpoint, InquiryDivision, SearchConfig, DEFAULT_BID_BASE_URL,
    DEFAULT_SCSBID_BASE_URL,
};
use bidcast_core::ForecastPolicy;
use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::Deserialize;

/// data.go.kr service key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceKey(String);

impl ServiceKey {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServiceKey(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CollectionLimits {
    pub per_page: u32,
    pub max_pages: u32,
    pub max_items: usize,
    /// Rows appended to the output CSV per write.
    pub save_interval: usize,
    /// Look up award results for every collected announcement.
    pub fetch_awards: bool,
}

impl Default for CollectionLimits {
    fn default() -> Self {
        Self {
            per_page: 100,
            max_pages: 100,
            max_items: 1000,
            save_interval: 50,
            fetch_awards: false,
        }
    }
}

/// Search used by scheduled runs: the trailing `lookback_days` up to today.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScheduledSearch {
    pub keyword: Option<String>,
    pub lookback_days: u32,
    pub inquiry: InquiryDivision,
}

impl Default for ScheduledSearch {
    fn default() -> Self {
        Self {
            keyword: None,
            lookback_days: 7,
            inquiry: InquiryDivision::Announced,
        }
    }
}

impl ScheduledSearch {
    pub fn window_ending(&self, today: NaiveDate) -> SearchConfig {
        let start = today - ChronoDuration::days(i64::from(self.lookback_days));
        let search = SearchConfig::new(start, today).with_inquiry(self.inquiry);
        match &self.keyword {
            Some(keyword) => search.with_keyword(keyword.clone()),
            None => search,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub endpoints: Vec<BidEndpoint>,
    pub forecast: ForecastPolicy,
    pub collection: CollectionLimits,
    pub schedule: ScheduledSearch,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            forecast: ForecastPolicy::default(),
            collection: CollectionLimits::default(),
            schedule: ScheduledSearch::default(),
        }
    }
}

impl Settings {
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
        };
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings = serde_yaml::from_str(text)?;
        settings
            .forecast
            .validate()
            .context("invalid forecast settings")?;
        Ok(settings)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub service_key: Option<ServiceKey>,
    pub bid_base_url: String,
    pub scsbid_base_url: String,
    pub data_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub max_workers: usize,
    pub scheduler_enabled: bool,
    pub sync_cron_1: String,
    pub sync_cron_2: String,
    pub database_url: Option<String>,
    pub settings_path: PathBuf,
    pub settings: Settings,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes"))
        .unwrap_or(false)
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("BIDCAST_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        Self {
            service_key: std::env::var("BID_API_KEY").ok().and_then(ServiceKey::new),
            bid_base_url: env_or("BID_BASE_URL", DEFAULT_BID_BASE_URL),
            scsbid_base_url: env_or("SCSBID_BASE_URL", DEFAULT_SCSBID_BASE_URL),
            artifacts_dir: std::env::var("ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("artifacts")),
            data_dir,
            user_agent: env_or("BIDCAST_USER_AGENT", "bidcast/0.1"),
            http_timeout_secs: std::env::var("BIDCAST_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            max_workers: std::env::var("BIDCAST_MAX_WORKERS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(4),
            scheduler_enabled: env_flag("BIDCAST_SCHEDULER_ENABLED"),
            sync_cron_1: env_or("SYNC_CRON_1", "0 6 * * *"),
            sync_cron_2: env_or("SYNC_CRON_2", "0 18 * * *"),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            settings_path: std::env::var("BIDCAST_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("bidcast.yaml")),
            settings: Settings::default(),
        }
    }

    /// `from_env` plus the settings file it points at.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::from_env();
        config.settings = Settings::load(&config.settings_path)?;
        Ok(config)
    }

    pub fn require_service_key(&self) -> anyhow::Result<&ServiceKey> {
        self.service_key
            .as_ref()
            .context("BID_API_KEY is not set; add it to the environment or .env")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    pub fn collected_dir(&self) -> PathBuf {
        self.data_dir.join("collected")
    }

    pub fn edits_path(&self) -> PathBuf {
        self.data_dir.join("user_inputs.json")
    }
}
