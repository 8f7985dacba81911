use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{EpisodeFile, EpisodeFileRow, NewEpisodeFile};

impl Database {
    // ========================================================================
    // Episode File Operations
    // ========================================================================

    /// Record an archived episode file. Returns the new row id.
    pub async fn insert_episode_file(&self, file: &NewEpisodeFile) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO episode_files
                (feed_id, entry_id, title, description, source_url, storage_link,
                 slot, size_bytes, published, archived_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(file.feed_id)
        .bind(&file.entry_id)
        .bind(&file.title)
        .bind(&file.description)
        .bind(&file.source_url)
        .bind(&file.storage_link)
        .bind(&file.slot)
        .bind(file.size_bytes as i64)
        .bind(file.published_at.timestamp())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Whether an entry of a feed already has an archived file.
    pub async fn has_episode_file(&self, feed_id: i64, entry_id: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM episode_files WHERE feed_id = ? AND entry_id = ?")
                .bind(feed_id)
                .bind(entry_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Files not yet included in a delivered digest, oldest archive first.
    pub async fn unsent_episode_files(&self) -> Result<Vec<EpisodeFile>> {
        let rows = sqlx::query_as::<_, EpisodeFileRow>(
            r#"
            SELECT id, feed_id, entry_id, title, description, source_url, storage_link,
                   slot, size_bytes, published, sent
            FROM episode_files
            WHERE sent = 0
            ORDER BY id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EpisodeFileRow::into_file).collect())
    }

    /// Flag files as delivered in a single UPDATE.
    pub async fn mark_sent(&self, file_ids: &[i64]) -> Result<u64> {
        if file_ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE episode_files SET sent = 1 WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in file_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Bytes already recorded in a storage slot.
    pub async fn slot_usage(&self, slot: &str) -> Result<u64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COALESCE(SUM(size_bytes), 0) FROM episode_files WHERE slot = ?")
                .bind(slot)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0.max(0) as u64)
    }
}
