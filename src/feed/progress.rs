use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Snapshot of the current (or last) refresh sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchProgress {
    pub total: usize,
    pub completed: usize,
    pub running: bool,
    /// Title of the feed most recently picked up by a worker
    pub current_feed: Option<String>,
    pub errors: Vec<FeedFailure>,
}

/// One failed feed within a sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedFailure {
    pub feed_id: i64,
    pub feed_title: String,
    pub message: String,
}

/// Identifies one sweep so late completions from an abandoned sweep can be ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepId(u64);

#[derive(Default)]
struct TrackerState {
    generation: u64,
    active: Option<SweepId>,
    progress: FetchProgress,
}

/// Mutex-guarded sweep progress shared between the orchestrator, its
/// workers and any observer.
///
/// Every method takes the lock for a single synchronous transition; the
/// guard never lives across an await.
#[derive(Default)]
pub struct ProgressTracker {
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // A panicking observer must not wedge the tracker
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply an arbitrary transition to the progress record under the lock.
    pub fn update<R>(&self, mutator: impl FnOnce(&mut FetchProgress) -> R) -> R {
        mutator(&mut self.lock().progress)
    }

    /// Owned copy of the current progress.
    pub fn snapshot(&self) -> FetchProgress {
        self.lock().progress.clone()
    }

    /// Reset for a new sweep over `total` feeds and mark it running.
    pub fn begin(&self, total: usize) -> SweepId {
        let mut state = self.lock();
        state.generation += 1;
        let id = SweepId(state.generation);
        state.active = Some(id);
        state.progress = FetchProgress {
            total,
            completed: 0,
            running: true,
            current_feed: None,
            errors: Vec::new(),
        };
        id
    }

    /// Note that a worker of `sweep` picked up a feed.
    pub fn set_current(&self, sweep: SweepId, title: &str) {
        self.update_active(sweep, |progress| {
            progress.current_feed = Some(title.to_string());
        });
    }

    /// Count one finished feed, keeping its failure if any.
    ///
    /// Returns `false` when `sweep` is no longer the active sweep and the
    /// completion was dropped.
    pub fn record_completion(&self, sweep: SweepId, failure: Option<FeedFailure>) -> bool {
        self.update_active(sweep, |progress| {
            progress.completed = (progress.completed + 1).min(progress.total);
            if let Some(failure) = failure {
                progress.errors.push(failure);
            }
            if progress.completed == progress.total {
                progress.running = false;
                progress.current_feed = None;
            }
        })
    }

    /// Close `sweep`. Later completions for it are ignored.
    pub fn finish(&self, sweep: SweepId) {
        let mut state = self.lock();
        if state.active == Some(sweep) {
            state.active = None;
            state.progress.running = false;
            state.progress.current_feed = None;
        }
    }

    fn update_active(&self, sweep: SweepId, f: impl FnOnce(&mut FetchProgress)) -> bool {
        let mut state = self.lock();
        if state.active != Some(sweep) {
            return false;
        }
        f(&mut state.progress);
        true
    }
}
