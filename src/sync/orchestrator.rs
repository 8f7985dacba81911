use chrono::NaiveDate;
use serde::Serialize;
use std::time::Instant;
use tracing::Instrument;

use super::cursor::CursorStore;
use super::engine::{FeedSync, SyncEngine, SyncError};
use crate::feed::{Episode, FeedSource};
use crate::storage::FeedRecord;

/// A feed that could not be synced this run. Its cursor was not advanced.
#[derive(Debug, Clone, Serialize)]
pub struct FeedFailure {
    pub feed_id: i64,
    pub url: String,
    pub error: String,
}

/// Aggregate result of one pass over every feed.
#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    /// New episodes, feed by feed in input order, each feed newest-first
    pub episodes: Vec<Episode>,
    pub failures: Vec<FeedFailure>,
    pub feeds_synced: usize,
    pub skipped_entries: usize,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl<S: FeedSource, C: CursorStore> SyncEngine<S, C> {
    /// Sync every feed in `feeds`, one after another.
    ///
    /// A failing feed is recorded and logged; the pass moves on to the next
    /// feed. Episodes are concatenated in feed order without merging.
    pub async fn sync_all(&self, feeds: &[FeedRecord], cutoff: NaiveDate) -> SyncReport {
        let span = tracing::info_span!(parent: self.span(), "sync_all", feeds = feeds.len(), %cutoff);

        async move {
            let started = Instant::now();
            let mut report = SyncReport::default();

            for feed in feeds {
                match self.sync_record(feed, cutoff).await {
                    Ok(synced) => {
                        report.feeds_synced += 1;
                        report.skipped_entries += synced.skipped;
                        self.record_metadata(feed.id, &synced).await;
                        report.episodes.extend(synced.episodes);
                        self.record_status(feed.id, None).await;
                    }
                    Err(e) => {
                        tracing::warn!(feed_id = feed.id, url = %feed.url, error = %e, "Feed sync failed");
                        let error = e.to_string();
                        self.record_status(feed.id, Some(&error)).await;
                        report.failures.push(FeedFailure {
                            feed_id: feed.id,
                            url: feed.url.clone(),
                            error,
                        });
                    }
                }
            }

            tracing::info!(
                episodes = report.episodes.len(),
                synced = report.feeds_synced,
                failed = report.failures.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Sync pass complete"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn sync_record(
        &self,
        feed: &FeedRecord,
        cutoff: NaiveDate,
    ) -> Result<FeedSync, SyncError> {
        let cursor = self
            .store()
            .load(feed.id)
            .await
            .map_err(SyncError::Persistence)?;
        self.sync(feed.id, &feed.url, &cursor, cutoff).await
    }

    /// A 304 carries no metadata; otherwise the feed's title and description
    /// follow what the source currently publishes.
    async fn record_metadata(&self, feed_id: i64, synced: &FeedSync) {
        if synced.title.is_none() && synced.description.is_none() {
            return;
        }
        if let Err(e) = self
            .store()
            .record_metadata(feed_id, synced.title.as_deref(), synced.description.as_deref())
            .await
        {
            tracing::warn!(feed_id = feed_id, error = %e, "Failed to record feed metadata");
        }
    }

    /// Status stamps are bookkeeping; failing to write one never fails the feed.
    async fn record_status(&self, feed_id: i64, error: Option<&str>) {
        if let Err(e) = self.store().record_sync_status(feed_id, error).await {
            tracing::warn!(feed_id = feed_id, error = %e, "Failed to record sync status");
        }
    }
}
