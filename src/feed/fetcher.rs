use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::feed::parser::parse_feed;
use crate::feed::sanitize::sanitize_feed_bytes;
use crate::http::{build_client, read_limited_bytes, BodyError};
use crate::storage::{Database, Feed};

/// Errors that can occur while refreshing one feed.
///
/// These cover the full lifecycle of a fetch: network issues, HTTP errors,
/// parsing failures, and database problems.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the per-feed timeout
    #[error("Request timed out")]
    Timeout,
    /// Feed document could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Database operation failed during article storage
    #[error("Database error: {0}")]
    Database(String),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// The caller cancelled the fetch
    #[error("Fetch cancelled")]
    Cancelled,
    /// The feed URL failed validation
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),
}

impl From<BodyError> for FetchError {
    fn from(err: BodyError) -> Self {
        match err {
            BodyError::Network(e) => FetchError::Network(e),
            BodyError::TooLarge => FetchError::ResponseTooLarge,
        }
    }
}

/// Downloads, sanitizes, parses and stores a single feed.
pub struct FeedRetriever {
    db: Database,
    client: reqwest::Client,
    user_agent: String,
    timeout: Duration,
    max_bytes: usize,
    allow_private_hosts: bool,
}

impl FeedRetriever {
    /// Build a retriever from configuration. The shared client carries the
    /// global proxy; feeds with their own proxy get a dedicated client.
    pub fn new(db: Database, config: &Config) -> Result<Self, FetchError> {
        let client = build_client(
            &config.user_agent,
            config.proxy_url.as_deref(),
            config.allow_private_hosts,
        )?;
        Ok(Self::with_client(db, client, config))
    }

    pub fn with_client(db: Database, client: reqwest::Client, config: &Config) -> Self {
        Self {
            db,
            client,
            user_agent: config.user_agent.clone(),
            timeout: config.feed_timeout(),
            max_bytes: config.max_feed_bytes,
            allow_private_hosts: config.allow_private_hosts,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Fetch a feed and record the outcome on its row.
    ///
    /// Success clears the stored error (inside the refresh transaction); any
    /// failure other than cancellation is written to the feed's error column.
    pub async fn refresh(&self, feed: &Feed, cancel: &CancellationToken) -> Result<usize, FetchError> {
        let result = self.fetch_feed(feed, cancel).await;

        match &result {
            Ok(count) => {
                tracing::debug!(feed_id = feed.id, new_or_changed = count, "Feed refreshed");
            }
            Err(FetchError::Cancelled) => {
                tracing::debug!(feed_id = feed.id, "Feed fetch cancelled");
            }
            Err(e) => {
                tracing::warn!(feed_id = feed.id, url = %feed.url, error = %e, "Feed fetch failed");
                if let Err(db_err) = self.db.set_feed_error(feed.id, Some(&e.to_string())).await {
                    tracing::warn!(feed_id = feed.id, error = %db_err, "Failed to record feed error");
                }
            }
        }

        result
    }

    /// Fetch, sanitize, parse and upsert one feed, returning the number of
    /// new or changed articles.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] - Connection or TLS errors
    /// - [`FetchError::Timeout`] - Request exceeded the per-feed timeout
    /// - [`FetchError::Cancelled`] - `cancel` fired before the body arrived
    /// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
    /// - [`FetchError::ResponseTooLarge`] - Body exceeded the size cap
    /// - [`FetchError::Parse`] - Invalid feed document
    /// - [`FetchError::Database`] - Failed to store articles
    pub async fn fetch_feed(&self, feed: &Feed, cancel: &CancellationToken) -> Result<usize, FetchError> {
        let bytes = self.download(feed, cancel).await?;

        let sanitized = sanitize_feed_bytes(&bytes);
        if sanitized.len() != bytes.len() {
            tracing::debug!(
                feed_id = feed.id,
                removed_bytes = bytes.len() - sanitized.len(),
                "Stripped unsafe link elements"
            );
        }

        let parsed = parse_feed(&sanitized, &feed.url).map_err(|e| FetchError::Parse(e.to_string()))?;

        if feed.title.trim().is_empty() || feed.html_url.is_none() {
            self.db
                .adopt_feed_metadata(feed.id, parsed.title.as_deref(), parsed.site_url.as_deref())
                .await
                .map_err(|e| FetchError::Database(e.to_string()))?;
        }

        // Upsert, clear the error and stamp last_fetched in one transaction
        self.db
            .complete_feed_refresh(feed.id, &parsed.articles)
            .await
            .map_err(|e| FetchError::Database(e.to_string()))
    }

    /// GET the feed body, bounded by the per-feed timeout and raced against `cancel`.
    async fn download(&self, feed: &Feed, cancel: &CancellationToken) -> Result<Vec<u8>, FetchError> {
        let client = match feed.proxy_url.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(proxy) => build_client(&self.user_agent, Some(proxy), self.allow_private_hosts)?,
            None => self.client.clone(),
        };

        let request = async {
            let response = client.get(&feed.url).send().await?;
            if !response.status().is_success() {
                return Err(FetchError::HttpStatus(response.status().as_u16()));
            }
            Ok(read_limited_bytes(response, self.max_bytes).await?)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = tokio::time::timeout(self.timeout, request) => {
                result.map_err(|_| FetchError::Timeout)?
            }
        }
    }
}
