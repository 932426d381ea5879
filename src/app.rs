//! Wiring: turns a [`Config`] into the stores and capabilities each
//! subcommand needs.

use reqwest::redirect::Policy;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{CacheError, CacheStore, MemoryCacheStore, SqliteCacheStore};
use crate::config::{Config, Provider};
use crate::content::{ContentError, ReaderClient};
use crate::enrich::{ChatClient, LeadSummarizer, LexiconClassifier, SentimentClassifier, Summarizer};
use crate::feed::HttpFeedSource;
use crate::pipeline::{
    refresh_snapshot, run_ingest, Consumer, IngestError, IngestReport, RefreshError,
};
use crate::server::AppState;
use crate::storage::{Database, DatabaseError};
use crate::util::unix_now;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("Content reader setup failed: {0}")]
    Content(#[from] ContentError),
    #[error("HTTP client setup failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("No feed URL configured (set feed.url)")]
    MissingFeedUrl,
    #[error("Provider 'openai' needs an API key (enrichment.api_key or BRIEF_LLM_API_KEY)")]
    MissingLlmKey,
}

/// Redirect policy for outbound fetches.
///
/// Caps the chain at 3 hops and stops on loops.
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// Stores and shared HTTP client for one process.
pub struct App {
    pub config: Config,
    pub db: Database,
    pub cache: Arc<dyn CacheStore>,
    http: reqwest::Client,
}

impl App {
    pub async fn open(config: Config) -> Result<Self, AppError> {
        let db = Database::open(&config.database_path).await?;

        let cache: Arc<dyn CacheStore> = match config.cache_location() {
            Some(path) => {
                tracing::debug!(path = %path, "Using file-backed snapshot cache");
                Arc::new(SqliteCacheStore::open(&path, Some(config.cache.ttl_hours)).await?)
            }
            None => {
                tracing::debug!("Using in-process snapshot cache");
                Arc::new(MemoryCacheStore::default().with_ttl_secs(config.cache.ttl_hours * 3600))
            }
        };

        let http = reqwest::Client::builder()
            .redirect(create_redirect_policy())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("brief/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            config,
            db,
            cache,
            http,
        })
    }

    pub fn feed_source(&self) -> Result<HttpFeedSource, AppError> {
        let url = self
            .config
            .feed
            .url
            .as_deref()
            .ok_or(AppError::MissingFeedUrl)?;
        Ok(HttpFeedSource::new(self.http.clone(), url)
            .with_timeout(Duration::from_secs(self.config.feed.timeout_secs)))
    }

    /// Build a consumer with the configured provider.
    pub fn consumer(&self) -> Result<Consumer, AppError> {
        let consumer_config = self.config.consumer_config();
        let reader = ReaderClient::new(
            self.http.clone(),
            &self.config.content.reader_base_url,
            self.config.reader_api_key(),
        )?
        .with_min_content_chars(self.config.content.min_content_chars)
        .with_timeout(consumer_config.call_timeout);

        let classifier: Arc<dyn SentimentClassifier>;
        let summarizer: Arc<dyn Summarizer>;
        match self.config.enrichment.provider {
            Provider::Local => {
                classifier = Arc::new(LexiconClassifier::new());
                summarizer = Arc::new(LeadSummarizer::default());
            }
            Provider::OpenAi => {
                let key = self.config.llm_api_key().ok_or(AppError::MissingLlmKey)?;
                let chat = Arc::new(
                    ChatClient::new(
                        self.http.clone(),
                        &self.config.enrichment.base_url,
                        &self.config.enrichment.model,
                        Some(key),
                    )
                    .with_timeout(consumer_config.call_timeout),
                );
                classifier = chat.clone();
                summarizer = chat;
            }
        }

        Ok(Consumer::new(
            self.db.clone(),
            Arc::new(reader),
            classifier,
            summarizer,
            consumer_config,
        ))
    }

    pub async fn ingest(&self) -> Result<IngestReport, AppError> {
        let source = self.feed_source()?;
        Ok(run_ingest(&self.db, &source, self.config.feed.page_size, unix_now()).await?)
    }

    pub async fn refresh_cache(&self) -> Result<usize, RefreshError> {
        refresh_snapshot(
            &self.db,
            self.cache.as_ref(),
            &self.config.refresh_config(),
            unix_now(),
        )
        .await
    }

    pub fn server_state(&self) -> AppState {
        AppState::new(
            self.db.clone(),
            self.cache.clone(),
            self.config.refresh_config(),
            self.config.cache.max_staleness_secs,
        )
    }
}
