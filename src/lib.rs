//! Concurrent feed refresh and blogroll discovery over a SQLite subscription store.
//!
//! - [`feed`] - sanitize, parse, fetch and sweep subscribed feeds
//! - [`discovery`] - find new feeds through the sites subscribed blogs link to
//! - [`storage`] - SQLite persistence for feeds and articles
//! - [`config`] - TOML configuration
//! - [`util`] - URL policy, text cleanup, cancellation helpers

pub mod config;
pub mod discovery;
pub mod feed;
pub mod http;
pub mod storage;
pub mod util;
