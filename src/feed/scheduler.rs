use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::feed::orchestrator::{FetchOrchestrator, SweepOutcome};

/// Run a refresh sweep every `interval` until `cancel` fires.
///
/// The first sweep happens one interval after start. A zero interval means
/// manual refresh only and returns immediately.
pub async fn run(orchestrator: Arc<FetchOrchestrator>, interval: Duration, cancel: CancellationToken) {
    if interval.is_zero() {
        tracing::info!("Automatic refresh disabled");
        return;
    }

    tracing::info!(interval_secs = interval.as_secs(), "Refresh scheduler started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match orchestrator.fetch_all(&cancel).await {
            Ok(SweepOutcome::Completed(summary)) => {
                tracing::debug!(new_articles = summary.new_articles, "Scheduled sweep finished");
            }
            Ok(SweepOutcome::AlreadyRunning) => {
                tracing::debug!("Scheduled sweep skipped, manual sweep in progress");
            }
            Ok(SweepOutcome::Cancelled) => break,
            Err(e) => tracing::warn!(error = %e, "Scheduled sweep failed"),
        }
    }

    tracing::info!("Refresh scheduler stopped");
}
