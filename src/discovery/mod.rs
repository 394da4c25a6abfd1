//! Blogroll discovery: finding new feeds through the sites a subscribed blog links to.
//!
//! A feed's homepage is fetched, outbound links to other sites are collected
//! (following a same-site friend-links page when one exists), and each
//! linked site is probed for a feed. Confirmed feeds come back scored and
//! ranked, with already-subscribed feeds filtered out by the caller-facing
//! [`DiscoveryService`].
//!
//! - [`extract`] - HTML link harvesting and candidate filtering
//! - [`crawler`] - Homepage fetch, candidate probing and ranking
//! - [`service`] - Store-backed single and batch discovery

pub mod crawler;
pub mod extract;
pub mod service;

use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::http::BodyError;

pub use crawler::Crawler;
pub use service::DiscoveryService;

/// A feed confirmed on a site linked from a subscribed blog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredBlog {
    pub name: String,
    pub homepage: String,
    pub feed_url: String,
    /// Confidence in [0, 1]
    pub score: f64,
}

/// Messages streamed to whoever started a discovery run.
///
/// Serialized with an internal `type` tag, e.g.
/// `{"type":"progress","message":"Fetching homepage"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DiscoveryEvent {
    Progress { message: String },
    Error { message: String },
    Complete { feeds: Vec<DiscoveredBlog> },
}

/// Errors that end discovery for one feed.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The URL failed validation (bad scheme, private address, etc.)
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// HTTP request failed
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// Non-2xx response
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded its time budget
    #[error("request timed out")]
    Timeout,
    /// Response body exceeded the page size limit
    #[error("response too large")]
    TooLarge,
    /// The run's cancellation token fired
    #[error("discovery cancelled")]
    Cancelled,
    #[error("feed {0} not found")]
    FeedNotFound(i64),
    #[error("database error: {0}")]
    Store(String),
}

impl From<BodyError> for DiscoveryError {
    fn from(err: BodyError) -> Self {
        match err {
            BodyError::Network(e) => DiscoveryError::Network(e),
            BodyError::TooLarge => DiscoveryError::TooLarge,
        }
    }
}

/// Sending half of a discovery event stream.
///
/// A disabled sender (or one whose receiver has gone away) silently drops
/// events; discovery never fails because nobody is listening.
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    tx: Option<mpsc::Sender<DiscoveryEvent>>,
    indent: String,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<DiscoveryEvent>) -> Self {
        Self {
            tx: Some(tx),
            indent: String::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// A sender whose progress and error messages are indented one level further.
    pub fn nested(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            indent: format!("{}  ", self.indent),
        }
    }

    pub async fn progress(&self, message: impl Into<String>) {
        let message = format!("{}{}", self.indent, message.into());
        self.send(DiscoveryEvent::Progress { message }).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        let message = format!("{}{}", self.indent, message.into());
        self.send(DiscoveryEvent::Error { message }).await;
    }

    pub async fn complete(&self, feeds: Vec<DiscoveredBlog>) {
        self.send(DiscoveryEvent::Complete { feeds }).await;
    }

    async fn send(&self, event: DiscoveryEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                tracing::debug!("Discovery event receiver dropped");
            }
        }
    }
}

/// Drop every blog whose feed URL is already subscribed.
pub fn filter_subscribed(blogs: Vec<DiscoveredBlog>, subscribed: &HashSet<String>) -> Vec<DiscoveredBlog> {
    blogs
        .into_iter()
        .filter(|blog| !subscribed.contains(&blog.feed_url))
        .collect()
}
