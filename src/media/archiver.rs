use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{Instrument, Span};
use url::Url;

use super::download::{download_enclosure, enclosure_extension, sanitize_file_name, unique_path};
use super::pool::StoragePool;
use super::MediaError;
use crate::feed::Episode;
use crate::storage::{Database, NewEpisodeFile};

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveFailure {
    pub feed_id: i64,
    pub entry_id: String,
    pub error: String,
}

/// Outcome of one archive pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveReport {
    /// Ids of the `episode_files` rows written by this pass
    pub stored: Vec<i64>,
    /// Episodes without an enclosure, or already archived
    pub skipped: usize,
    pub failed: Vec<ArchiveFailure>,
}

enum Placement {
    Stored(i64),
    Skipped,
}

/// Downloads enclosures and files them into the storage pool.
pub struct Archiver {
    db: Database,
    client: reqwest::Client,
    work_dir: PathBuf,
    pool: StoragePool,
    span: Span,
}

impl Archiver {
    pub fn new(db: Database, client: reqwest::Client, work_dir: PathBuf, pool: StoragePool) -> Self {
        Self {
            db,
            client,
            work_dir,
            pool,
            span: Span::current(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn pool(&self) -> &StoragePool {
        &self.pool
    }

    /// Archive each episode in turn. A failing episode is recorded in the
    /// report and the batch moves on.
    pub async fn archive_all(&mut self, episodes: &[Episode]) -> ArchiveReport {
        let mut report = ArchiveReport::default();

        for episode in episodes {
            let span = tracing::info_span!(
                parent: &self.span,
                "archive",
                feed_id = episode.feed_id,
                entry_id = %episode.entry_id
            );
            match self.archive_one(episode).instrument(span.clone()).await {
                Ok(Placement::Stored(id)) => report.stored.push(id),
                Ok(Placement::Skipped) => report.skipped += 1,
                Err(MediaError::NoEnclosure) => {
                    span.in_scope(|| tracing::debug!("No audio enclosure, skipping"));
                    report.skipped += 1;
                }
                Err(e) => {
                    span.in_scope(|| tracing::warn!(error = %e, "Failed to archive episode"));
                    report.failed.push(ArchiveFailure {
                        feed_id: episode.feed_id,
                        entry_id: episode.entry_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            parent: &self.span,
            stored = report.stored.len(),
            skipped = report.skipped,
            failed = report.failed.len(),
            "Archive pass complete"
        );
        report
    }

    async fn archive_one(&mut self, episode: &Episode) -> Result<Placement, MediaError> {
        let source_url = episode
            .enclosure_url
            .as_deref()
            .ok_or(MediaError::NoEnclosure)?;

        let already = self
            .db
            .has_episode_file(episode.feed_id, &episode.entry_id)
            .await
            .map_err(|e| MediaError::Database(e.to_string()))?;
        if already {
            tracing::debug!("Already archived");
            return Ok(Placement::Skipped);
        }

        let file_name = sanitize_file_name(&episode.title, &enclosure_extension(source_url));
        let downloaded =
            download_enclosure(&self.client, source_url, &self.work_dir, &file_name).await?;

        let Some(slot) = self.pool.select(downloaded.size_bytes).cloned() else {
            let _ = tokio::fs::remove_file(&downloaded.path).await;
            return Err(MediaError::NoCapacity {
                size_bytes: downloaded.size_bytes,
            });
        };

        let stored_path = match place_file(&downloaded.path, &slot.path, &file_name).await {
            Ok(path) => path,
            Err(e) => {
                let _ = tokio::fs::remove_file(&downloaded.path).await;
                return Err(e);
            }
        };
        let storage_link = storage_link(&stored_path).await;

        let inserted = self
            .db
            .insert_episode_file(&NewEpisodeFile {
                feed_id: episode.feed_id,
                entry_id: episode.entry_id.clone(),
                title: episode.title.clone(),
                description: episode.description.clone(),
                source_url: source_url.to_string(),
                storage_link,
                slot: slot.name.clone(),
                size_bytes: downloaded.size_bytes,
                published_at: episode.published_at,
            })
            .await;
        let id = match inserted {
            Ok(id) => id,
            Err(e) => {
                // An unrecorded file would occupy the slot without counting against it.
                let _ = tokio::fs::remove_file(&stored_path).await;
                return Err(MediaError::Database(e.to_string()));
            }
        };

        self.pool.record(&slot.name, downloaded.size_bytes);
        tracing::info!(slot = %slot.name, size_bytes = downloaded.size_bytes, "Episode archived");
        Ok(Placement::Stored(id))
    }
}

/// Move a downloaded file into a slot directory, copying when the slot is
/// on another filesystem.
async fn place_file(from: &Path, slot_dir: &Path, file_name: &str) -> Result<PathBuf, MediaError> {
    tokio::fs::create_dir_all(slot_dir).await?;
    let dest = unique_path(slot_dir, file_name).await;

    if tokio::fs::rename(from, &dest).await.is_err() {
        tokio::fs::copy(from, &dest).await?;
        tokio::fs::remove_file(from).await?;
    }
    Ok(dest)
}

/// `file://` URL of the stored file, or its plain path when no URL can be formed.
async fn storage_link(path: &Path) -> String {
    let absolute = tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf());
    Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| absolute.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::StorageSlot;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn episode(feed_id: i64, entry_id: &str, title: &str, url: Option<String>) -> Episode {
        Episode {
            feed_id,
            entry_id: entry_id.to_string(),
            title: title.to_string(),
            enclosure_url: url,
            description: "About it".to_string(),
            published_at: Utc.with_ymd_and_hms(2025, 10, 7, 10, 0, 0).unwrap(),
        }
    }

    async fn audio_server(body_len: usize) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ep.mp3"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8; body_len])
                    .insert_header("Content-Type", "audio/mpeg"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page.mp3"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html/>")
                    .insert_header("Content-Type", "text/html"),
            )
            .mount(&server)
            .await;
        server
    }

    struct Fixture {
        db: Database,
        feed_id: i64,
        root: tempfile::TempDir,
    }

    impl Fixture {
        async fn new() -> Self {
            let db = Database::open(":memory:").await.unwrap();
            let feed_id = db.register_feed("https://a.test/f", Some("Show"), None).await.unwrap();
            Self {
                db,
                feed_id,
                root: tempfile::tempdir().unwrap(),
            }
        }

        fn slot(&self, name: &str, quota: u64) -> StorageSlot {
            StorageSlot {
                name: name.to_string(),
                path: self.root.path().join(name),
                quota_bytes: quota,
            }
        }

        fn archiver(&self, slots: Vec<StorageSlot>) -> Archiver {
            Archiver::new(
                self.db.clone(),
                reqwest::Client::new(),
                self.root.path().join("work"),
                StoragePool::new(slots.into_iter().map(|s| (s, 0))),
            )
        }
    }

    #[tokio::test]
    async fn test_archive_stores_file_in_first_fitting_slot() {
        let fx = Fixture::new().await;
        let server = audio_server(500).await;
        let mut archiver = fx.archiver(vec![fx.slot("small", 100), fx.slot("large", 10_000)]);

        let eps = vec![episode(
            fx.feed_id,
            "e1",
            "Ep 1: Hello_world",
            Some(format!("{}/ep.mp3", server.uri())),
        )];
        let report = archiver.archive_all(&eps).await;

        assert_eq!(report.stored.len(), 1);
        assert_eq!(report.skipped, 0);
        assert!(report.failed.is_empty());

        let stored = fx.root.path().join("large").join("Ep 1 Hello world.mp3");
        assert_eq!(std::fs::metadata(&stored).unwrap().len(), 500);
        assert!(!fx.root.path().join("work").join("Ep 1 Hello world.mp3").exists());

        let files = fx.db.unsent_episode_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].slot, "large");
        assert_eq!(files[0].size_bytes, 500);
        assert!(files[0].storage_link.starts_with("file://"));
        assert_eq!(archiver.pool().free_bytes("large"), Some(9_500));
    }

    #[tokio::test]
    async fn test_archive_skips_missing_enclosure_and_repeats() {
        let fx = Fixture::new().await;
        let server = audio_server(10).await;
        let mut archiver = fx.archiver(vec![fx.slot("main", 10_000)]);

        let url = Some(format!("{}/ep.mp3", server.uri()));
        let eps = vec![
            episode(fx.feed_id, "e1", "One", url.clone()),
            episode(fx.feed_id, "e2", "Two", None),
        ];
        let first = archiver.archive_all(&eps).await;
        assert_eq!(first.stored.len(), 1);
        assert_eq!(first.skipped, 1);

        let second = archiver.archive_all(&eps[..1]).await;
        assert!(second.stored.is_empty());
        assert_eq!(second.skipped, 1);
    }

    #[tokio::test]
    async fn test_archive_failures_do_not_stop_batch() {
        let fx = Fixture::new().await;
        let server = audio_server(50).await;
        let mut archiver = fx.archiver(vec![fx.slot("main", 10_000)]);

        let eps = vec![
            episode(fx.feed_id, "bad", "Bad", Some(format!("{}/page.mp3", server.uri()))),
            episode(fx.feed_id, "good", "Good", Some(format!("{}/ep.mp3", server.uri()))),
        ];
        let report = archiver.archive_all(&eps).await;

        assert_eq!(report.stored.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].entry_id, "bad");
        assert!(report.failed[0].error.contains("text/html"));
    }

    #[tokio::test]
    async fn test_archive_without_capacity_discards_download() {
        let fx = Fixture::new().await;
        let server = audio_server(500).await;
        let mut archiver = fx.archiver(vec![fx.slot("tiny", 500)]);

        let eps = vec![episode(
            fx.feed_id,
            "e1",
            "Too big",
            Some(format!("{}/ep.mp3", server.uri())),
        )];
        let report = archiver.archive_all(&eps).await;

        assert!(report.stored.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(!fx.root.path().join("work").join("Too big.mp3").exists());
        assert!(fx.db.unsent_episode_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_insert_removes_placed_file() {
        let fx = Fixture::new().await;
        let server = audio_server(40).await;
        let mut archiver = fx.archiver(vec![fx.slot("main", 10_000)]);

        // No such feed: the foreign key rejects the row after the file is placed.
        let eps = vec![episode(
            fx.feed_id + 100,
            "orphan",
            "Orphan",
            Some(format!("{}/ep.mp3", server.uri())),
        )];
        let report = archiver.archive_all(&eps).await;

        assert!(report.stored.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].error.starts_with("Database error"));
        assert!(!fx.root.path().join("main").join("Orphan.mp3").exists());
        assert_eq!(archiver.pool().free_bytes("main"), Some(10_000));
    }
}
