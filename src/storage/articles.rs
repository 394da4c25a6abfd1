use anyhow::Result;
use sqlx::SqliteConnection;

use super::schema::Database;
use super::types::{Article, ParsedArticle};

/// Maximum number of articles returned by a single listing query
const MAX_ARTICLES: i64 = 2000;

impl Database {
    // ========================================================================
    // Article Upserts
    // ========================================================================

    /// Upsert articles for a feed, returning how many rows were inserted or changed.
    ///
    /// Existing rows keep `read`, `favorite`, `hidden` and `fetched_at`; only
    /// title, url, content, author and publish time are refreshed, and a row
    /// counts as changed only if one of those actually differs.
    pub async fn upsert_articles(&self, feed_id: i64, articles: &[ParsedArticle]) -> Result<usize> {
        if articles.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let count = upsert_in(&mut *tx, feed_id, articles).await?;
        tx.commit().await?;
        Ok(count)
    }

    /// Record a successful fetch atomically: upsert articles, clear the feed
    /// error and stamp `last_fetched`.
    pub async fn complete_feed_refresh(
        &self,
        feed_id: i64,
        articles: &[ParsedArticle],
    ) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let count = upsert_in(&mut *tx, feed_id, articles).await?;

        sqlx::query("UPDATE feeds SET last_fetched = ?, error = NULL WHERE id = ?")
            .bind(now)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(count)
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Articles of one feed, newest first
    pub async fn get_articles_for_feed(&self, feed_id: i64) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, Article>(
            r#"
            SELECT id, feed_id, dedup_key, title, url, content, author, published,
                   read, favorite, hidden, fetched_at
            FROM articles
            WHERE feed_id = ?
            ORDER BY published DESC, id DESC
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(MAX_ARTICLES)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ========================================================================
    // Article Mutations
    // ========================================================================

    /// Set the read flag, returning whether the row changed
    pub async fn mark_article_read(&self, article_id: i64, read: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE articles SET read = ? WHERE id = ? AND read != ?")
            .bind(read)
            .bind(article_id)
            .bind(read)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically toggle the favorite flag, returning the new value
    pub async fn toggle_article_favorite(&self, article_id: i64) -> Result<bool> {
        let result: (bool,) = sqlx::query_as(
            "UPDATE articles SET favorite = NOT favorite WHERE id = ? RETURNING favorite",
        )
        .bind(article_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(result.0)
    }

    /// Atomically toggle the hidden flag, returning the new value
    pub async fn toggle_article_hidden(&self, article_id: i64) -> Result<bool> {
        let result: (bool,) =
            sqlx::query_as("UPDATE articles SET hidden = NOT hidden WHERE id = ? RETURNING hidden")
                .bind(article_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(result.0)
    }
}

async fn upsert_in(
    conn: &mut SqliteConnection,
    feed_id: i64,
    articles: &[ParsedArticle],
) -> Result<usize> {
    let now = chrono::Utc::now().timestamp();
    let mut touched = 0usize;

    for article in articles {
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO articles
                (feed_id, dedup_key, title, url, content, author, published, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(feed_id)
        .bind(&article.key)
        .bind(&article.title)
        .bind(&article.url)
        .bind(&article.content)
        .bind(&article.author)
        .bind(article.published)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if inserted > 0 {
            touched += 1;
            continue;
        }

        // Existing row: refresh content fields only when something differs
        let updated = sqlx::query(
            r#"
            UPDATE articles SET
                title = ?, url = ?, content = ?, author = ?, published = ?
            WHERE feed_id = ? AND dedup_key = ?
              AND (title IS NOT ? OR url IS NOT ? OR content IS NOT ?
                   OR author IS NOT ? OR published IS NOT ?)
        "#,
        )
        .bind(&article.title)
        .bind(&article.url)
        .bind(&article.content)
        .bind(&article.author)
        .bind(article.published)
        .bind(feed_id)
        .bind(&article.key)
        .bind(&article.title)
        .bind(&article.url)
        .bind(&article.content)
        .bind(&article.author)
        .bind(article.published)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        touched += updated as usize;
    }

    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewFeed;
    use pretty_assertions::assert_eq;

    fn parsed(key: &str, title: &str, content: &str) -> ParsedArticle {
        ParsedArticle {
            key: key.to_string(),
            title: title.to_string(),
            url: Some(key.to_string()),
            content: Some(content.to_string()),
            author: None,
            published: Some(1_700_000_000),
        }
    }

    async fn db_with_feed() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let id = db
            .add_feed(&NewFeed {
                url: "https://example.com/feed.xml".into(),
                title: "Example".into(),
                ..NewFeed::default()
            })
            .await
            .unwrap();
        (db, id)
    }

    #[tokio::test]
    async fn test_upsert_counts_new_and_changed_rows() {
        let (db, feed_id) = db_with_feed().await;
        let first = vec![
            parsed("https://example.com/a", "A", "one"),
            parsed("https://example.com/b", "B", "two"),
        ];
        assert_eq!(db.upsert_articles(feed_id, &first).await.unwrap(), 2);

        // Same content again: nothing new, nothing changed
        assert_eq!(db.upsert_articles(feed_id, &first).await.unwrap(), 0);

        let second = vec![
            parsed("https://example.com/a", "A", "one, edited"),
            parsed("https://example.com/b", "B", "two"),
            parsed("https://example.com/c", "C", "three"),
        ];
        assert_eq!(db.upsert_articles(feed_id, &second).await.unwrap(), 2);
        assert_eq!(db.get_articles_for_feed(feed_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_upsert_preserves_user_state() {
        let (db, feed_id) = db_with_feed().await;
        db.upsert_articles(feed_id, &[parsed("https://example.com/a", "A", "v1")])
            .await
            .unwrap();

        let article = db.get_articles_for_feed(feed_id).await.unwrap().remove(0);
        assert!(db.mark_article_read(article.id, true).await.unwrap());
        assert!(db.toggle_article_favorite(article.id).await.unwrap());
        assert!(db.toggle_article_hidden(article.id).await.unwrap());

        db.upsert_articles(feed_id, &[parsed("https://example.com/a", "A2", "v2")])
            .await
            .unwrap();

        let refreshed = db.get_articles_for_feed(feed_id).await.unwrap().remove(0);
        assert_eq!(refreshed.id, article.id);
        assert_eq!(refreshed.title, "A2");
        assert_eq!(refreshed.content.as_deref(), Some("v2"));
        assert!(refreshed.read);
        assert!(refreshed.favorite);
        assert!(refreshed.hidden);
        assert_eq!(refreshed.fetched_at, article.fetched_at);
    }

    #[tokio::test]
    async fn test_complete_feed_refresh_clears_error() {
        let (db, feed_id) = db_with_feed().await;
        db.set_feed_error(feed_id, Some("HTTP error: status 500"))
            .await
            .unwrap();

        db.complete_feed_refresh(feed_id, &[]).await.unwrap();

        let feed = db.get_feed_by_id(feed_id).await.unwrap().unwrap();
        assert!(feed.error.is_none());
        assert!(feed.last_fetched.is_some());
    }

    #[tokio::test]
    async fn test_same_key_in_two_feeds_is_not_deduplicated() {
        let (db, feed_a) = db_with_feed().await;
        let feed_b = db
            .add_feed(&NewFeed {
                url: "https://other.example/feed".into(),
                title: "Other".into(),
                ..NewFeed::default()
            })
            .await
            .unwrap();

        let item = [parsed("https://shared.example/post", "Shared", "x")];
        assert_eq!(db.upsert_articles(feed_a, &item).await.unwrap(), 1);
        assert_eq!(db.upsert_articles(feed_b, &item).await.unwrap(), 1);
    }
}
