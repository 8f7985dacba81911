use chrono::NaiveDate;
use std::time::Instant;
use thiserror::Error;
use tracing::{Instrument, Span};

use super::cursor::{CursorStore, FeedCursor, StoreError};
use crate::feed::{Episode, Extractor, FeedSource, FetchError, RawEntry};

#[derive(Debug, Error)]
pub enum SyncError {
    /// The feed could not be fetched or parsed; the cursor was not touched
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The updated cursor could not be stored; the feed's episodes are withheld
    #[error("Cursor store failed: {0}")]
    Persistence(#[source] StoreError),
}

/// Why the entry walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every entry was new
    Exhausted,
    /// Hit the entry recorded by the previous sync
    ReachedLastSeen,
    /// Hit an entry published before the cutoff date
    BeforeCutoff,
}

/// Result of walking one fetched entry list against a cursor.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub episodes: Vec<Episode>,
    pub cursor: FeedCursor,
    /// Entries dropped because extraction failed
    pub skipped: usize,
    pub stop: StopReason,
}

/// Decide which entries are new.
///
/// `entries` must be newest-first. The updated cursor points at the first
/// entry; the walk stops at the previous boundary entry or at the first entry
/// published before `cutoff`, whichever comes first.
pub fn scan(
    feed_id: i64,
    entries: &[RawEntry],
    cursor: &FeedCursor,
    etag: Option<&str>,
    cutoff: NaiveDate,
    extractor: &Extractor,
) -> ScanOutcome {
    let mut updated = FeedCursor {
        feed_id,
        ..cursor.clone()
    };
    if let Some(tag) = etag.filter(|t| !t.is_empty()) {
        updated.etag = tag.to_string();
    }

    let Some(newest) = entries.first() else {
        return ScanOutcome {
            episodes: Vec::new(),
            cursor: updated,
            skipped: 0,
            stop: StopReason::Exhausted,
        };
    };
    updated.last_seen_entry_id = newest.id.clone();
    updated.last_seen_date = newest.published;

    let boundary = cursor.last_seen_entry_id.as_str();
    let mut episodes = Vec::new();
    let mut skipped = 0;
    let mut stop = StopReason::Exhausted;

    for entry in entries {
        if !boundary.is_empty() && entry.id == boundary {
            stop = StopReason::ReachedLastSeen;
            break;
        }

        let episode = match extractor.extract(feed_id, entry) {
            Ok(episode) => episode,
            Err(e) => {
                tracing::warn!(feed_id = feed_id, error = %e, "Skipping entry");
                skipped += 1;
                continue;
            }
        };

        if episode.published_at.date_naive() < cutoff {
            stop = StopReason::BeforeCutoff;
            break;
        }

        episodes.push(episode);
    }

    ScanOutcome {
        episodes,
        cursor: updated,
        skipped,
        stop,
    }
}

/// Outcome of one successful feed sync.
#[derive(Debug, Clone)]
pub struct FeedSync {
    pub episodes: Vec<Episode>,
    pub cursor: FeedCursor,
    pub skipped: usize,
    pub not_modified: bool,
    /// Feed-level metadata from the response, when the source sent a body
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Fetches one feed, scans it against its cursor and stores the new cursor.
pub struct SyncEngine<S, C> {
    source: S,
    store: C,
    extractor: Extractor,
    span: Span,
}

impl<S: FeedSource, C: CursorStore> SyncEngine<S, C> {
    /// Log events are emitted under the span that is current at construction;
    /// use [`SyncEngine::with_span`] to supply another one.
    pub fn new(source: S, store: C, extractor: Extractor) -> Self {
        Self {
            source,
            store,
            extractor,
            span: Span::current(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    /// Sync a single feed.
    ///
    /// The cursor is saved only after a complete fetch-and-scan pass and only
    /// when it changed. A save failure is returned as
    /// [`SyncError::Persistence`] and no episodes are handed out, so every
    /// returned episode lies behind an already-advanced cursor.
    pub async fn sync(
        &self,
        feed_id: i64,
        source_uri: &str,
        cursor: &FeedCursor,
        cutoff: NaiveDate,
    ) -> Result<FeedSync, SyncError> {
        let span = tracing::info_span!(parent: &self.span, "feed_sync", feed_id = feed_id, uri = %source_uri);

        async move {
            let started = Instant::now();
            let fetched = self.source.fetch(source_uri, cursor.etag_hint()).await?;
            tracing::debug!(
                entries = fetched.entries.len(),
                not_modified = fetched.not_modified,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Fetched feed"
            );

            let outcome = scan(
                feed_id,
                &fetched.entries,
                cursor,
                fetched.etag.as_deref(),
                cutoff,
                &self.extractor,
            );

            if outcome.cursor != *cursor {
                self.store
                    .save(&outcome.cursor)
                    .await
                    .map_err(SyncError::Persistence)?;
            }

            tracing::info!(
                new_episodes = outcome.episodes.len(),
                skipped = outcome.skipped,
                stop = ?outcome.stop,
                "Feed synced"
            );

            Ok::<_, SyncError>(FeedSync {
                episodes: outcome.episodes,
                cursor: outcome.cursor,
                skipped: outcome.skipped,
                not_modified: fetched.not_modified,
                title: fetched.title,
                description: fetched.description,
            })
        }
        .instrument(span)
        .await
    }
}
