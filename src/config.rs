//! Configuration file parser for `brief.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos. API keys from the environment take precedence
//! over the file.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::cache::DEFAULT_CACHE_KEY;
use crate::content::{DEFAULT_MIN_CONTENT_CHARS, DEFAULT_READER_BASE_URL};
use crate::enrich::{DEFAULT_CHAT_BASE_URL, DEFAULT_CHAT_MODEL};
use crate::pipeline::{ConsumerConfig, RefreshConfig, RetryPolicy, DEFAULT_MAX_FAILURES};
use crate::server::DEFAULT_MAX_STALENESS_SECS;

/// Path value that keeps a store inside the process.
pub const MEMORY_PATH: &str = ":memory:";

/// Environment variable for the content reader key.
pub const READER_KEY_ENV: &str = "JINA_API_KEY";
/// Environment variable for the chat provider key.
pub const LLM_KEY_ENV: &str = "BRIEF_LLM_API_KEY";

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

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All sections use `#[serde(default)]` so any subset of keys can be given.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path of the durable item database.
    pub database_path: String,

    /// Path of the snapshot cache database. Defaults to a file beside
    /// `database_path`; `":memory:"` keeps the cache inside the process.
    pub cache_path: Option<String>,

    pub feed: FeedConfig,
    pub consumer: ConsumerSection,
    pub content: ContentConfig,
    pub enrichment: EnrichmentConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
    pub schedule: ScheduleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "brief.db".to_string(),
            cache_path: None,
            feed: FeedConfig::default(),
            consumer: ConsumerSection::default(),
            content: ContentConfig::default(),
            enrichment: EnrichmentConfig::default(),
            cache: CacheConfig::default(),
            server: ServerConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// RSS or Atom feed to ingest. Required by `ingest` and `schedule`.
    pub url: Option<String>,
    /// Maximum entries taken from one fetch.
    pub page_size: usize,
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: None,
            page_size: 50,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerSection {
    pub batch_size: usize,
    /// Failed attempts before an item is quarantined.
    pub max_failures: u32,
    pub lease_secs: i64,
    pub call_timeout_secs: u64,
}

impl Default for ConsumerSection {
    fn default() -> Self {
        let defaults = ConsumerConfig::default();
        Self {
            batch_size: defaults.batch_size,
            max_failures: DEFAULT_MAX_FAILURES,
            lease_secs: defaults.lease_secs,
            call_timeout_secs: defaults.call_timeout.as_secs(),
        }
    }
}

/// Content reader settings.
///
/// Custom Debug masks `api_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub reader_base_url: String,
    pub min_content_chars: usize,
    /// Reader API key (alternative to `JINA_API_KEY`).
    pub api_key: Option<String>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            reader_base_url: DEFAULT_READER_BASE_URL.to_string(),
            min_content_chars: DEFAULT_MIN_CONTENT_CHARS,
            api_key: None,
        }
    }
}

impl std::fmt::Debug for ContentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentConfig")
            .field("reader_base_url", &self.reader_base_url)
            .field("min_content_chars", &self.min_content_chars)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Offline lexicon classifier and lead summarizer
    #[default]
    Local,
    /// OpenAI-compatible chat completions
    OpenAi,
}

/// Sentiment and summary provider settings.
///
/// Custom Debug masks `api_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub provider: Provider,
    pub base_url: String,
    pub model: String,
    /// Chat API key (alternative to `BRIEF_LLM_API_KEY`).
    pub api_key: Option<String>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Local,
            base_url: DEFAULT_CHAT_BASE_URL.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for EnrichmentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub key: String,
    /// Oldest snapshot the read service serves without falling back.
    pub max_staleness_secs: i64,
    /// Lifetime of a stored snapshot in the SQLite cache.
    pub ttl_hours: i64,
    /// Pending items updated this recently are included in snapshots.
    pub recent_pending_secs: i64,
    pub max_items: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let refresh = RefreshConfig::default();
        Self {
            key: DEFAULT_CACHE_KEY.to_string(),
            max_staleness_secs: DEFAULT_MAX_STALENESS_SECS,
            ttl_hours: 24,
            recent_pending_secs: refresh.recent_pending_secs,
            max_items: refresh.max_items,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub ingest_interval_secs: u64,
    pub enrich_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            ingest_interval_secs: 900,
            enrich_interval_secs: 60,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 9] = [
        "database_path",
        "cache_path",
        "feed",
        "consumer",
        "content",
        "enrichment",
        "cache",
        "server",
        "schedule",
    ];

    /// Load configuration from a TOML file, then apply environment overrides
    /// and validate.
    ///
    /// - Missing file → defaults
    /// - Empty file → defaults
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(path)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading to avoid loading a huge file
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
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            database = %config.database_path,
            provider = ?config.enrichment.provider,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Environment keys win over keys in the file.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var(READER_KEY_ENV).filter(|k| !k.is_empty()) {
            self.content.api_key = Some(key);
        }
        if let Some(key) = var(LLM_KEY_ENV).filter(|k| !k.is_empty()) {
            self.enrichment.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.consumer;
        if c.batch_size == 0 {
            return Err(ConfigError::Invalid("consumer.batch_size must be at least 1".into()));
        }
        if c.max_failures == 0 {
            return Err(ConfigError::Invalid("consumer.max_failures must be at least 1".into()));
        }
        if c.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "consumer.call_timeout_secs must be at least 1".into(),
            ));
        }
        // The lease is renewed as each item starts, then covers up to three bounded calls
        let min_lease = c.call_timeout_secs.saturating_mul(3);
        if c.lease_secs <= 0 || (c.lease_secs as u64) <= min_lease {
            return Err(ConfigError::Invalid(format!(
                "consumer.lease_secs ({}) must exceed 3 x call_timeout_secs ({})",
                c.lease_secs, min_lease
            )));
        }
        if self.feed.page_size == 0 {
            return Err(ConfigError::Invalid("feed.page_size must be at least 1".into()));
        }
        if self.cache.max_items == 0 {
            return Err(ConfigError::Invalid("cache.max_items must be at least 1".into()));
        }
        Ok(())
    }

    /// Reader key, wrapped so it never reaches logs.
    pub fn reader_api_key(&self) -> Option<SecretString> {
        secret(&self.content.api_key)
    }

    pub fn llm_api_key(&self) -> Option<SecretString> {
        secret(&self.enrichment.api_key)
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            batch_size: self.consumer.batch_size,
            policy: RetryPolicy::new(self.consumer.max_failures),
            lease_secs: self.consumer.lease_secs,
            call_timeout: Duration::from_secs(self.consumer.call_timeout_secs),
        }
    }

    /// Where the snapshot cache lives, or `None` for an in-process cache.
    ///
    /// Every subcommand is its own process, so by default the cache sits next
    /// to the item database (`brief.db` becomes `brief.cache.db`) and a
    /// snapshot written by `enrich` or `refresh-cache` is the one `serve`
    /// reads. An in-memory item database keeps the cache in memory too.
    pub fn cache_location(&self) -> Option<String> {
        match self.cache_path.as_deref() {
            Some(MEMORY_PATH) => None,
            Some(path) => Some(path.to_string()),
            None if self.database_path == MEMORY_PATH => None,
            None => Some(
                Path::new(&self.database_path)
                    .with_extension("cache.db")
                    .to_string_lossy()
                    .into_owned(),
            ),
        }
    }

    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            key: self.cache.key.clone(),
            max_failures: self.consumer.max_failures,
            recent_pending_secs: self.cache.recent_pending_secs,
            max_items: self.cache.max_items,
        }
    }
}

fn secret(key: &Option<String>) -> Option<SecretString> {
    key.as_deref()
        .filter(|k| !k.is_empty())
        .map(|k| SecretString::from(k.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
