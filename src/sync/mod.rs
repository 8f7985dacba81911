//! Incremental feed synchronisation.
//!
//! Each feed carries a [`FeedCursor`]: the ETag of the last response plus the
//! ID and publish date of the newest entry seen. A sync pass fetches the feed
//! with the ETag as a conditional hint, walks entries newest-first and stops
//! at whichever comes first:
//!
//! - the entry recorded in the cursor (stable IDs)
//! - an entry published before the cutoff date (unstable or reset IDs)
//!
//! The cursor then moves to the first entry of the response. Cursors only
//! move after a complete fetch-and-scan, so a failed feed is retried from the
//! same position on the next run.
//!
//! - [`engine`] - the per-feed scan and [`SyncEngine`]
//! - [`orchestrator`] - [`SyncEngine::sync_all`] over every registered feed
//! - [`cursor`] - cursor type and the [`CursorStore`] contract

pub mod cursor;
pub mod engine;
pub mod orchestrator;

pub use cursor::{CursorStore, FeedCursor, StoreError};
pub use engine::{scan, FeedSync, ScanOutcome, StopReason, SyncEngine, SyncError};
pub use orchestrator::{FeedFailure, SyncReport};
