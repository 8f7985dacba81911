use anyhow::Result;
use async_trait::async_trait;

use super::schema::Database;
use super::types::{timestamp_to_datetime, FeedRecord, FeedRow};
use crate::sync::{CursorStore, FeedCursor, StoreError};

const FEED_COLUMNS: &str = "id, url, title, description, etag, last_entry_id, last_entry_date, last_synced, error";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Register a feed with an empty cursor.
    ///
    /// Re-registering a known URL keeps its id and cursor; only a non-null
    /// title or description replaces the stored one.
    pub async fn register_feed(
        &self,
        url: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (url, title, description) VALUES (?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = COALESCE(excluded.title, feeds.title),
                description = COALESCE(excluded.description, feeds.description)
            RETURNING id
        "#,
        )
        .bind(url)
        .bind(title)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// All feeds in registration order.
    pub async fn list_feeds(&self) -> Result<Vec<FeedRecord>> {
        let rows: Vec<FeedRow> =
            sqlx::query_as(&format!("SELECT {} FROM feeds ORDER BY id", FEED_COLUMNS))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(FeedRecord::from_row).collect())
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<FeedRecord>> {
        let row: Option<FeedRow> =
            sqlx::query_as(&format!("SELECT {} FROM feeds WHERE id = ?", FEED_COLUMNS))
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(FeedRecord::from_row))
    }
}

#[async_trait]
impl CursorStore for Database {
    async fn load(&self, feed_id: i64) -> Result<FeedCursor, StoreError> {
        let row: Option<(String, String, Option<i64>)> = sqlx::query_as(
            "SELECT etag, last_entry_id, last_entry_date FROM feeds WHERE id = ?",
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        let (etag, last_seen_entry_id, last_seen_date) =
            row.ok_or(StoreError::UnknownFeed(feed_id))?;
        Ok(FeedCursor {
            feed_id,
            etag,
            last_seen_entry_id,
            last_seen_date: timestamp_to_datetime(last_seen_date),
        })
    }

    /// ID and date are written in one statement so they never drift apart.
    async fn save(&self, cursor: &FeedCursor) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE feeds SET etag = ?, last_entry_id = ?, last_entry_date = ? WHERE id = ?",
        )
        .bind(&cursor.etag)
        .bind(&cursor.last_seen_entry_id)
        .bind(cursor.last_seen_date.map(|d| d.timestamp()))
        .bind(cursor.feed_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownFeed(cursor.feed_id));
        }
        Ok(())
    }

    async fn record_sync_status(
        &self,
        feed_id: i64,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        match error {
            None => {
                let now = chrono::Utc::now().timestamp();
                sqlx::query("UPDATE feeds SET last_synced = ?, error = NULL WHERE id = ?")
                    .bind(now)
                    .bind(feed_id)
                    .execute(&self.pool)
                    .await?;
            }
            Some(message) => {
                sqlx::query("UPDATE feeds SET error = ? WHERE id = ?")
                    .bind(message)
                    .bind(feed_id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn record_metadata(
        &self,
        feed_id: i64,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), StoreError> {
        let title = title.map(str::trim).filter(|t| !t.is_empty());
        let description = description.map(str::trim).filter(|d| !d.is_empty());
        if title.is_none() && description.is_none() {
            return Ok(());
        }

        sqlx::query(
            "UPDATE feeds SET title = COALESCE(?, title), description = COALESCE(?, description) WHERE id = ?",
        )
        .bind(title)
        .bind(description)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;
    use crate::sync::{CursorStore, FeedCursor, StoreError};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_registered_feed_has_empty_cursor() {
        let db = test_db().await;
        let id = db
            .register_feed("https://example.com/feed.rss", Some("Show"), None)
            .await
            .unwrap();

        let cursor = db.load(id).await.unwrap();
        assert_eq!(cursor, FeedCursor::empty(id));
    }

    #[tokio::test]
    async fn test_reregister_keeps_id_and_cursor() {
        let db = test_db().await;
        let id = db
            .register_feed("https://example.com/feed.rss", Some("Old"), Some("Desc"))
            .await
            .unwrap();
        let cursor = FeedCursor {
            feed_id: id,
            etag: "\"v3\"".to_string(),
            last_seen_entry_id: "ep-9".to_string(),
            last_seen_date: Some(Utc.with_ymd_and_hms(2025, 10, 7, 10, 0, 0).unwrap()),
        };
        db.save(&cursor).await.unwrap();

        let again = db
            .register_feed("https://example.com/feed.rss", None, None)
            .await
            .unwrap();
        assert_eq!(again, id);
        assert_eq!(db.load(id).await.unwrap(), cursor);

        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.title.as_deref(), Some("Old"));
        assert_eq!(feed.description.as_deref(), Some("Desc"));
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip_with_null_date() {
        let db = test_db().await;
        let id = db.register_feed("https://a.test/f", None, None).await.unwrap();
        let cursor = FeedCursor {
            feed_id: id,
            etag: String::new(),
            last_seen_entry_id: "undated".to_string(),
            last_seen_date: None,
        };
        db.save(&cursor).await.unwrap();
        assert_eq!(db.load(id).await.unwrap(), cursor);
    }

    #[tokio::test]
    async fn test_unknown_feed_errors() {
        let db = test_db().await;
        assert!(matches!(db.load(42).await, Err(StoreError::UnknownFeed(42))));
        assert!(matches!(
            db.save(&FeedCursor::empty(42)).await,
            Err(StoreError::UnknownFeed(42))
        ));
    }

    #[tokio::test]
    async fn test_sync_status_sets_and_clears_error() {
        let db = test_db().await;
        let id = db.register_feed("https://a.test/f", None, None).await.unwrap();

        db.record_sync_status(id, Some("HTTP error: status 500"))
            .await
            .unwrap();
        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.error.as_deref(), Some("HTTP error: status 500"));
        assert!(feed.last_synced.is_none());

        db.record_sync_status(id, None).await.unwrap();
        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert!(feed.error.is_none());
        assert!(feed.last_synced.is_some());
    }

    #[tokio::test]
    async fn test_list_feeds_in_registration_order() {
        let db = test_db().await;
        db.register_feed("https://b.test/f", Some("B"), None).await.unwrap();
        db.register_feed("https://a.test/f", Some("A"), None).await.unwrap();

        let feeds = db.list_feeds().await.unwrap();
        let urls: Vec<&str> = feeds.iter().map(|f| f.url.as_str()).collect();
        assert_eq!(urls, vec!["https://b.test/f", "https://a.test/f"]);
    }

    #[tokio::test]
    async fn test_update_metadata_does_not_clear_existing() {
        let db = test_db().await;
        let id = db
            .register_feed("https://a.test/f", Some("Kept"), None)
            .await
            .unwrap();
        db.record_metadata(id, None, Some("Fresh description"))
            .await
            .unwrap();
        db.record_metadata(id, Some("  "), None).await.unwrap();

        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.display_title(), "Kept");
        assert_eq!(feed.description.as_deref(), Some("Fresh description"));
    }
}
