use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The feed database is locked by another process. Close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, folding SQLite lock conditions into `InstanceLocked`.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    // SQLITE_BUSY (5), SQLITE_LOCKED (6)
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub url: String,
    /// Homepage declared by the feed or supplied at subscription time
    pub html_url: Option<String>,
    pub category: Option<String>,
    /// Set once blogroll discovery has run for this feed
    pub discovery_completed: bool,
    /// Per-feed proxy override
    pub proxy_url: Option<String>,
    /// Per-feed refresh interval override, in minutes
    pub refresh_interval_minutes: Option<i64>,
    pub last_fetched: Option<i64>,
    pub error: Option<String>,
}

/// Fields supplied when subscribing to a feed.
#[derive(Debug, Clone, Default)]
pub struct NewFeed {
    pub url: String,
    pub title: String,
    pub category: Option<String>,
    pub html_url: Option<String>,
}

/// A normalized feed item ready to be upserted.
///
/// `key` is the per-feed dedup key: the item link when present, otherwise
/// the item id, otherwise a content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedArticle {
    pub key: String,
    pub title: String,
    pub url: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub published: Option<i64>,
}

/// A stored article including its user state.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub dedup_key: String,
    pub title: String,
    pub url: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub published: Option<i64>,
    pub read: bool,
    pub favorite: bool,
    pub hidden: bool,
    pub fetched_at: i64,
}
