//! Configuration file parser for ~/.config/feedhaul/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, though we log a warning for each one
//! since they are usually typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of feeds fetched simultaneously during a sweep.
    pub worker_pool_size: usize,

    /// Per-feed fetch timeout in seconds.
    pub feed_timeout_secs: u64,

    /// Maximum accepted feed body size in bytes.
    pub max_feed_bytes: usize,

    /// Minutes between scheduled sweeps. 0 = manual refresh only.
    pub refresh_interval_minutes: u64,

    /// User-Agent header sent with every request.
    pub user_agent: String,

    /// Proxy applied to every request unless a feed carries its own override.
    pub proxy_url: Option<String>,

    /// Permit loopback and private-network URLs (local test servers, intranet feeds).
    pub allow_private_hosts: bool,

    pub discovery: DiscoveryConfig,
}

/// Budgets for blogroll discovery.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Deadline for discovering from one feed.
    pub single_timeout_secs: u64,
    /// Deadline for a batch run over all undiscovered feeds.
    pub batch_timeout_secs: u64,
    /// Timeout for each individual page or feed request.
    pub page_timeout_secs: u64,
    /// Maximum size of a fetched HTML page or probed feed.
    pub max_page_bytes: usize,
    /// Upper bound on candidates probed per feed.
    pub max_candidates: usize,
    /// Candidates probed at once within one feed.
    pub probe_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_pool_size: 10,
            feed_timeout_secs: 30,
            max_feed_bytes: 10 * 1024 * 1024,
            refresh_interval_minutes: 10,
            user_agent: concat!("feedhaul/", env!("CARGO_PKG_VERSION")).to_string(),
            proxy_url: None,
            allow_private_hosts: false,
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            single_timeout_secs: 60,
            batch_timeout_secs: 300,
            page_timeout_secs: 10,
            max_page_bytes: 2 * 1024 * 1024,
            max_candidates: 30,
            probe_concurrency: 4,
        }
    }
}

/// Proxy URLs can carry credentials, so they are masked in Debug output.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("worker_pool_size", &self.worker_pool_size)
            .field("feed_timeout_secs", &self.feed_timeout_secs)
            .field("max_feed_bytes", &self.max_feed_bytes)
            .field("refresh_interval_minutes", &self.refresh_interval_minutes)
            .field("user_agent", &self.user_agent)
            .field("proxy_url", &self.proxy_url.as_ref().map(|_| "[REDACTED]"))
            .field("allow_private_hosts", &self.allow_private_hosts)
            .field("discovery", &self.discovery)
            .finish()
    }
}

impl Config {
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "worker_pool_size",
        "feed_timeout_secs",
        "max_feed_bytes",
        "refresh_interval_minutes",
        "user_agent",
        "proxy_url",
        "allow_private_hosts",
        "discovery",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)`
    /// - Zero pool size or candidate limits → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text. Blank text yields the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        tracing::info!(
            workers = config.worker_pool_size,
            refresh_minutes = config.refresh_interval_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid("worker_pool_size must be at least 1".into()));
        }
        if self.discovery.probe_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "discovery.probe_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }
}

impl DiscoveryConfig {
    pub fn single_timeout(&self) -> Duration {
        Duration::from_secs(self.single_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================
