use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::storage::DatabaseError;

/// Per-feed bookmark that makes incremental sync possible.
///
/// `last_seen_entry_id` and `last_seen_date` always describe the same entry:
/// the first (newest) entry of the last successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedCursor {
    pub feed_id: i64,
    /// Cache-validation token from the last fetch, empty if none was sent
    pub etag: String,
    /// Entry ID of the newest entry seen, empty if the feed was never synced
    pub last_seen_entry_id: String,
    pub last_seen_date: Option<DateTime<Utc>>,
}

impl FeedCursor {
    /// Cursor of a freshly registered feed.
    pub fn empty(feed_id: i64) -> Self {
        Self {
            feed_id,
            ..Self::default()
        }
    }

    /// True when no sync has ever advanced this cursor.
    pub fn is_unsynced(&self) -> bool {
        self.last_seen_entry_id.is_empty()
    }

    pub(crate) fn etag_hint(&self) -> Option<&str> {
        if self.etag.is_empty() {
            None
        } else {
            Some(self.etag.as_str())
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Feed {0} is not registered")]
    UnknownFeed(i64),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(DatabaseError::Other(err))
    }
}

/// Persistence contract for feed cursors.
///
/// There is a single writer per run, so implementations need no locking
/// beyond making each `save` atomic.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, feed_id: i64) -> Result<FeedCursor, StoreError>;

    async fn save(&self, cursor: &FeedCursor) -> Result<(), StoreError>;

    /// Stamp the outcome of a sync attempt: `None` marks success and clears
    /// any previous error.
    async fn record_sync_status(&self, feed_id: i64, error: Option<&str>)
        -> Result<(), StoreError>;

    /// Refresh the feed's title and description. `None` keeps the stored value.
    async fn record_metadata(
        &self,
        feed_id: i64,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), StoreError>;
}
