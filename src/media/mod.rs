//! Archiving of episode audio into quota-limited storage slots.
//!
//! Enclosures are streamed into a working directory, placed in the first
//! slot with room for them, and recorded as [`EpisodeFile`](crate::storage::EpisodeFile)
//! rows that the digest later reports.

pub mod archiver;
pub mod download;
pub mod pool;

use thiserror::Error;

pub use archiver::{ArchiveFailure, ArchiveReport, Archiver};
pub use download::{download_enclosure, sanitize_file_name, DownloadedFile};
pub use pool::{StoragePool, StorageSlot};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    HttpStatus(u16),

    #[error("Not an audio response (Content-Type '{content_type}')")]
    NotAudio { content_type: String },

    #[error("Episode has no audio enclosure")]
    NoEnclosure,

    #[error("No storage slot has room for {size_bytes} bytes")]
    NoCapacity { size_bytes: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),
}
