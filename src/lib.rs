//! Podcast feed watcher.
//!
//! Each registered feed keeps a cursor (ETag, newest entry id and date) so
//! that a sync pass reports only episodes that appeared since the last run.
//! New episodes can then be archived into storage slots and announced to
//! subscribers in a digest.

pub mod config;
pub mod digest;
pub mod feed;
pub mod media;
pub mod storage;
pub mod sync;
