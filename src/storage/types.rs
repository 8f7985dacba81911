use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another podwatch run appears to be in progress. Wait for it to finish and try again.")]
    InstanceLocked,

    #[error("Database migration failed: {0}")]
    Migration(String),

    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Row type for feed queries
pub(crate) type FeedRow = (
    i64,            // id
    String,         // url
    Option<String>, // title
    Option<String>, // description
    String,         // etag
    String,         // last_entry_id
    Option<i64>,    // last_entry_date
    Option<i64>,    // last_synced
    Option<String>, // error
);

pub(crate) fn timestamp_to_datetime(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
}

/// Internal row type for episode file queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EpisodeFileRow {
    pub id: i64,
    pub feed_id: i64,
    pub entry_id: String,
    pub title: String,
    pub description: String,
    pub source_url: String,
    pub storage_link: String,
    pub slot: String,
    pub size_bytes: i64,
    pub published: i64,
    pub sent: bool,
}

impl EpisodeFileRow {
    pub(crate) fn into_file(self) -> EpisodeFile {
        EpisodeFile {
            id: self.id,
            feed_id: self.feed_id,
            entry_id: self.entry_id,
            title: self.title,
            description: self.description,
            source_url: self.source_url,
            storage_link: self.storage_link,
            slot: self.slot,
            size_bytes: self.size_bytes.max(0) as u64,
            published_at: timestamp_to_datetime(Some(self.published)).unwrap_or_default(),
            sent: self.sent,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A registered feed, including its sync cursor columns.
#[derive(Debug, Clone, Serialize)]
pub struct FeedRecord {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub etag: String,
    pub last_entry_id: String,
    pub last_entry_date: Option<DateTime<Utc>>,
    pub last_synced: Option<DateTime<Utc>>,
    /// Text of the last sync failure, cleared by the next success
    pub error: Option<String>,
}

impl FeedRecord {
    pub(crate) fn from_row(row: FeedRow) -> Self {
        let (id, url, title, description, etag, last_entry_id, last_entry_date, last_synced, error) =
            row;
        Self {
            id,
            url,
            title,
            description,
            etag,
            last_entry_id,
            last_entry_date: timestamp_to_datetime(last_entry_date),
            last_synced: timestamp_to_datetime(last_synced),
            error,
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

/// An archived episode file waiting for (or already in) a digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeFile {
    pub id: i64,
    pub feed_id: i64,
    pub entry_id: String,
    pub title: String,
    pub description: String,
    /// Enclosure URL the file was downloaded from
    pub source_url: String,
    /// Where subscribers can fetch the file
    pub storage_link: String,
    /// Name of the storage slot holding the file
    pub slot: String,
    pub size_bytes: u64,
    pub published_at: DateTime<Utc>,
    pub sent: bool,
}

/// Fields needed to record a freshly archived file.
#[derive(Debug, Clone)]
pub struct NewEpisodeFile {
    pub feed_id: i64,
    pub entry_id: String,
    pub title: String,
    pub description: String,
    pub source_url: String,
    pub storage_link: String,
    pub slot: String,
    pub size_bytes: u64,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Subscriber {
    pub id: i64,
    pub name: String,
    pub email: String,
}
