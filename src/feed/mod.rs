//! Feed refresh pipeline.
//!
//! - [`sanitize`] - Strips hostile `<link>` elements from raw feed text
//! - [`parser`] - RSS/Atom/JSON Feed parsing via `feed-rs` into normalized items
//! - [`fetcher`] - Single-feed download, parse and store
//! - [`progress`] - Shared sweep progress
//! - [`orchestrator`] - Concurrent sweeps over all feeds
//! - [`scheduler`] - Periodic sweeps
//!
//! # Example
//!
//! ```ignore
//! let retriever = FeedRetriever::new(db.clone(), &config)?;
//! let orchestrator = FetchOrchestrator::new(db, retriever, &config);
//! let outcome = orchestrator.fetch_all(&CancellationToken::new()).await?;
//! ```

pub mod fetcher;
pub mod orchestrator;
pub mod parser;
pub mod progress;
pub mod sanitize;
pub mod scheduler;

pub use fetcher::{FeedRetriever, FetchError};
pub use orchestrator::{FetchOrchestrator, SweepOutcome, SweepSummary};
pub use parser::{parse_feed, ParsedFeed};
pub use progress::{FeedFailure, FetchProgress, ProgressTracker, SweepId};
pub use sanitize::{sanitize_feed_bytes, sanitize_feed_xml};
