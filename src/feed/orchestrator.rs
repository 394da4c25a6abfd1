use anyhow::{anyhow, Result};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::feed::fetcher::{FeedRetriever, FetchError};
use crate::feed::progress::{FeedFailure, FetchProgress, ProgressTracker};
use crate::storage::{Database, NewFeed};
use crate::util::{clean_display_name, validate_url};

const MAX_TITLE_CHARS: usize = 256;

/// How a call to [`FetchOrchestrator::fetch_all`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Another sweep was already in progress; nothing was started.
    AlreadyRunning,
    /// The caller cancelled; in-flight workers were told to stop.
    Cancelled,
    Completed(SweepSummary),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// New plus changed articles across all feeds
    pub new_articles: usize,
}

impl SweepSummary {
    fn record(&mut self, result: &Result<usize, FetchError>) {
        match result {
            Ok(count) => {
                self.succeeded += 1;
                self.new_articles += count;
            }
            Err(_) => self.failed += 1,
        }
    }
}

/// Clears the running flag however the sweep ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs refresh sweeps over every subscribed feed with a bounded worker pool.
pub struct FetchOrchestrator {
    db: Database,
    retriever: Arc<FeedRetriever>,
    progress: Arc<ProgressTracker>,
    sweeping: AtomicBool,
    pool_size: usize,
    allow_private_hosts: bool,
}

impl FetchOrchestrator {
    pub fn new(db: Database, retriever: FeedRetriever, config: &Config) -> Self {
        Self {
            db,
            retriever: Arc::new(retriever),
            progress: Arc::new(ProgressTracker::new()),
            sweeping: AtomicBool::new(false),
            pool_size: config.worker_pool_size.max(1),
            allow_private_hosts: config.allow_private_hosts,
        }
    }

    /// Snapshot of the current or most recent sweep.
    pub fn progress(&self) -> FetchProgress {
        self.progress.snapshot()
    }

    /// Shared handle for observers that outlive a borrow of the orchestrator.
    pub fn progress_tracker(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    pub fn is_running(&self) -> bool {
        self.sweeping.load(Ordering::Acquire)
    }

    /// Refresh every subscribed feed.
    ///
    /// Returns [`SweepOutcome::AlreadyRunning`] at once if a sweep is in
    /// progress. Feeds are fetched by at most `worker_pool_size` workers; a
    /// failing feed is recorded on its row and in the progress errors and
    /// never affects its siblings. Cancelling `cancel` makes this return
    /// [`SweepOutcome::Cancelled`] without waiting for in-flight workers.
    ///
    /// # Errors
    ///
    /// Only fails if the feed list cannot be read or the worker task panics.
    pub async fn fetch_all(&self, cancel: &CancellationToken) -> Result<SweepOutcome> {
        let Some(_guard) = SweepGuard::acquire(&self.sweeping) else {
            tracing::debug!("Sweep already running, skipping");
            return Ok(SweepOutcome::AlreadyRunning);
        };

        let feeds = self.db.list_feeds().await?;
        let total = feeds.len();
        let sweep = self.progress.begin(total);
        if feeds.is_empty() {
            self.progress.finish(sweep);
            return Ok(SweepOutcome::Completed(SweepSummary::default()));
        }

        tracing::info!(feeds = total, workers = self.pool_size, "Starting refresh sweep");

        let workers_token = cancel.child_token();
        let retriever = Arc::clone(&self.retriever);
        let progress = Arc::clone(&self.progress);
        let pool_size = self.pool_size;
        let token = workers_token.clone();

        let mut sweep_task = tokio::spawn(async move {
            stream::iter(feeds)
                .map(|feed| {
                    let retriever = Arc::clone(&retriever);
                    let progress = Arc::clone(&progress);
                    let token = token.clone();
                    async move {
                        progress.set_current(sweep, &feed.title);
                        let result = retriever.refresh(&feed, &token).await;
                        let failure = match &result {
                            Err(FetchError::Cancelled) | Ok(_) => None,
                            Err(e) => Some(FeedFailure {
                                feed_id: feed.id,
                                feed_title: feed.title.clone(),
                                message: e.to_string(),
                            }),
                        };
                        progress.record_completion(sweep, failure);
                        result
                    }
                })
                .buffer_unordered(pool_size)
                .fold(SweepSummary::default(), |mut summary, result| async move {
                    summary.record(&result);
                    summary
                })
                .await
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                workers_token.cancel();
                self.progress.finish(sweep);
                tracing::info!("Refresh sweep cancelled");
                Ok(SweepOutcome::Cancelled)
            }
            joined = &mut sweep_task => {
                self.progress.finish(sweep);
                let summary = joined.map_err(|e| anyhow!("Sweep task failed: {e}"))?;
                tracing::info!(
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    new_articles = summary.new_articles,
                    "Refresh sweep complete"
                );
                Ok(SweepOutcome::Completed(summary))
            }
        }
    }

    /// Subscribe to a feed and fetch it once right away.
    ///
    /// A failed first fetch is stored on the feed row and does not fail the
    /// subscription.
    pub async fn add_subscription(
        &self,
        url: &str,
        category: Option<&str>,
        title: Option<&str>,
    ) -> Result<i64, FetchError> {
        let feed_id = self.import_subscription(url, category, title).await?;

        let feed = self
            .db
            .get_feed_by_id(feed_id)
            .await
            .map_err(|e| FetchError::Database(e.to_string()))?
            .ok_or_else(|| FetchError::Database(format!("feed {feed_id} vanished after insert")))?;

        if let Err(e) = self.retriever.refresh(&feed, &CancellationToken::new()).await {
            tracing::info!(feed_id, error = %e, "First fetch of new subscription failed");
        }

        Ok(feed_id)
    }

    /// Subscribe to a feed without fetching it.
    pub async fn import_subscription(
        &self,
        url: &str,
        category: Option<&str>,
        title: Option<&str>,
    ) -> Result<i64, FetchError> {
        let parsed = validate_url(url.trim(), self.allow_private_hosts)
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let new_feed = NewFeed {
            url: parsed.to_string(),
            title: title
                .map(|t| clean_display_name(t, MAX_TITLE_CHARS))
                .unwrap_or_default(),
            category: category
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            html_url: None,
        };

        let id = self
            .db
            .add_feed(&new_feed)
            .await
            .map_err(|e| FetchError::Database(e.to_string()))?;
        tracing::info!(feed_id = id, url = %new_feed.url, "Subscribed to feed");
        Ok(id)
    }
}
