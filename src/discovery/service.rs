use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

use super::{filter_subscribed, Crawler, DiscoveredBlog, DiscoveryError, EventSender};
use crate::config::DiscoveryConfig;
use crate::storage::{Database, Feed};
use crate::util::child_with_timeout;

/// Runs discovery for stored feeds and keeps the discovery flags current.
pub struct DiscoveryService {
    db: Database,
    crawler: Crawler,
    config: DiscoveryConfig,
}

impl DiscoveryService {
    pub fn new(db: Database, crawler: Crawler, config: DiscoveryConfig) -> Self {
        Self { db, crawler, config }
    }

    /// Discover new feeds from one subscribed feed.
    ///
    /// Runs under the single-feed deadline derived from `cancel`, drops feeds
    /// that are already subscribed, marks the feed as discovered and finishes
    /// the event stream with `complete`. Failures are also reported as an
    /// `error` event.
    pub async fn discover_feed(
        &self,
        cancel: &CancellationToken,
        feed_id: i64,
        events: &EventSender,
    ) -> Result<Vec<DiscoveredBlog>, DiscoveryError> {
        let feed = match self.db.get_feed_by_id(feed_id).await {
            Ok(Some(feed)) => feed,
            Ok(None) => {
                let err = DiscoveryError::FeedNotFound(feed_id);
                events.error(err.to_string()).await;
                return Err(err);
            }
            Err(e) => {
                let err = DiscoveryError::Store(e.to_string());
                events.error(err.to_string()).await;
                return Err(err);
            }
        };
        let subscribed = self.subscribed_urls().await;

        let deadline = child_with_timeout(cancel, self.config.single_timeout());
        let _deadline_guard = deadline.clone().drop_guard();

        events.progress(format!("Discovering blogs from {}", feed.title)).await;
        let found = match self
            .crawler
            .discover_from_feed(&deadline, &feed.url, homepage_of(&feed), events)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(feed_id, error = %e, "Discovery failed");
                events.error(format!("Discovery failed: {e}")).await;
                return Err(e);
            }
        };

        let fresh = filter_subscribed(found, &subscribed);
        if let Err(e) = self.db.mark_feed_discovered(feed_id).await {
            tracing::warn!(feed_id, error = %e, "Failed to mark feed as discovered");
        }

        events.complete(fresh.clone()).await;
        Ok(fresh)
    }

    /// Discover from every feed that has not been through discovery yet,
    /// under the batch deadline derived from `cancel`.
    pub async fn discover_all(
        &self,
        cancel: &CancellationToken,
        events: &EventSender,
    ) -> Result<Vec<DiscoveredBlog>, DiscoveryError> {
        let feeds = match self.db.list_feeds().await {
            Ok(feeds) => feeds,
            Err(e) => {
                let err = DiscoveryError::Store(e.to_string());
                events.error(err.to_string()).await;
                return Err(err);
            }
        };

        if feeds.iter().all(|f| f.discovery_completed) {
            events.progress("All feeds have already been discovered").await;
            events.complete(Vec::new()).await;
            return Ok(Vec::new());
        }

        let subscribed = self.subscribed_urls().await;
        let deadline = child_with_timeout(cancel, self.config.batch_timeout());
        let _deadline_guard = deadline.clone().drop_guard();

        let found = self
            .discover_all_feeds(&deadline, &feeds, &subscribed, events)
            .await;
        events.complete(found.clone()).await;
        Ok(found)
    }

    /// Sequential discovery over the undiscovered feeds in `feeds`.
    ///
    /// Each feed gets the single-feed deadline, derived from `cancel`. Every
    /// feed that ran to the end of its own budget is marked discovered, even
    /// when it failed or found nothing; a feed interrupted by `cancel` itself
    /// is left for the next run. Stops at `cancel` and returns what has
    /// accumulated, best score first.
    ///
    /// The sort is stable: equal scores keep the order in which feeds were
    /// processed, and within one feed the order its links appeared. A feed URL
    /// reached from several feeds is kept once, at its first occurrence.
    pub async fn discover_all_feeds(
        &self,
        cancel: &CancellationToken,
        feeds: &[Feed],
        subscribed: &HashSet<String>,
        events: &EventSender,
    ) -> Vec<DiscoveredBlog> {
        let pending: Vec<&Feed> = feeds.iter().filter(|f| !f.discovery_completed).collect();
        let total = pending.len();
        events.progress(format!("Starting discovery for {total} feeds")).await;

        let nested = events.nested();
        let mut all = Vec::new();
        let mut seen = HashSet::new();
        let mut processed = 0usize;

        for (i, feed) in pending.into_iter().enumerate() {
            if cancel.is_cancelled() {
                events.progress("Discovery timed out, returning partial results").await;
                break;
            }
            events
                .progress(format!("Processing feed {}/{}: {}", i + 1, total, feed.title))
                .await;

            let feed_deadline = child_with_timeout(cancel, self.config.single_timeout());
            let _feed_guard = feed_deadline.clone().drop_guard();

            match self
                .crawler
                .discover_from_feed(&feed_deadline, &feed.url, homepage_of(feed), &nested)
                .await
            {
                Ok(found) => {
                    let fresh = filter_subscribed(found, subscribed);
                    if fresh.is_empty() {
                        nested.progress("No new feeds found").await;
                    } else {
                        nested.progress(format!("Found {} new feeds", fresh.len())).await;
                    }
                    all.extend(fresh.into_iter().filter(|b| seen.insert(b.feed_url.clone())));
                }
                Err(e) => {
                    tracing::warn!(feed_id = feed.id, error = %e, "Discovery failed");
                    nested.error(format!("{}: {e}", feed.title)).await;
                }
            }

            if cancel.is_cancelled() {
                events.progress("Discovery timed out, returning partial results").await;
                break;
            }

            processed += 1;
            if let Err(e) = self.db.mark_feed_discovered(feed.id).await {
                tracing::warn!(feed_id = feed.id, error = %e, "Failed to mark feed as discovered");
            }
        }

        all.sort_by(|a, b| b.score.total_cmp(&a.score));
        events
            .progress(format!(
                "Completed: Found {} new feeds from {} sources",
                all.len(),
                processed
            ))
            .await;
        all
    }

    /// Subscribed URLs; a store failure degrades to no filtering.
    async fn subscribed_urls(&self) -> HashSet<String> {
        self.db.list_feed_urls().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load subscribed feed URLs");
            HashSet::new()
        })
    }
}

fn homepage_of(feed: &Feed) -> &str {
    feed.html_url.as_deref().unwrap_or("")
}
