use anyhow::Result;
use std::collections::HashSet;

use super::schema::Database;
use super::types::{Feed, NewFeed};

const FEED_COLUMNS: &str = "id, title, url, html_url, category, discovery_completed, \
     proxy_url, refresh_interval_minutes, last_fetched, error";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a feed, returning its id.
    ///
    /// Subscribing to a URL that already exists keeps the existing row and
    /// only fills in a title or category that was previously empty.
    pub async fn add_feed(&self, feed: &NewFeed) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (title, url, category, html_url)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = CASE WHEN feeds.title = '' THEN excluded.title ELSE feeds.title END,
                category = COALESCE(feeds.category, excluded.category),
                html_url = COALESCE(feeds.html_url, excluded.html_url)
            RETURNING id
        "#,
        )
        .bind(&feed.title)
        .bind(&feed.url)
        .bind(&feed.category)
        .bind(&feed.html_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// All feeds, ordered by title
    pub async fn list_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY title COLLATE NOCASE, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    pub async fn get_feed_by_id(&self, feed_id: i64) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// The set of subscribed feed URLs, used to filter discovery results.
    pub async fn list_feed_urls(&self) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT url FROM feeds")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    /// Flag a feed as having been through blogroll discovery.
    pub async fn mark_feed_discovered(&self, feed_id: i64) -> Result<()> {
        sqlx::query("UPDATE feeds SET discovery_completed = 1 WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set or clear the error status for a feed
    pub async fn set_feed_error(&self, feed_id: i64, error: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE feeds SET error = ? WHERE id = ?")
            .bind(error)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fill in title and homepage from the feed document where the row has none.
    pub async fn adopt_feed_metadata(
        &self,
        feed_id: i64,
        title: Option<&str>,
        html_url: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE feeds SET
                title = CASE WHEN title = '' AND ? IS NOT NULL THEN ? ELSE title END,
                html_url = COALESCE(html_url, ?)
            WHERE id = ?
        "#,
        )
        .bind(title)
        .bind(title)
        .bind(html_url)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Set the per-feed proxy and refresh-interval overrides (`None` clears them).
    pub async fn set_feed_overrides(
        &self,
        feed_id: i64,
        proxy_url: Option<&str>,
        refresh_interval_minutes: Option<i64>,
    ) -> Result<()> {
        sqlx::query("UPDATE feeds SET proxy_url = ?, refresh_interval_minutes = ? WHERE id = ?")
            .bind(proxy_url)
            .bind(refresh_interval_minutes)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
