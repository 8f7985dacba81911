//! Plain-text digest of newly archived episodes.
//!
//! [`deliver_pending`] gathers every file not yet reported, hands one message
//! to a [`DigestSink`] and flags the files as sent only once the sink accepts
//! it. A failed delivery leaves them queued for the next run.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::media::download::unique_path;
use crate::storage::{Database, EpisodeFile, FeedRecord, Subscriber};

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("Delivery failed: {0}")]
    Sink(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestMessage {
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait DigestSink: Send + Sync {
    async fn deliver(
        &self,
        message: &DigestMessage,
        recipients: &[Subscriber],
    ) -> Result<(), DigestError>;
}

/// Result of a delivery attempt that produced a message.
#[derive(Debug, Clone, Serialize)]
pub struct DigestOutcome {
    pub files: usize,
    pub recipients: usize,
}

fn size_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Build the digest text, grouping files by feed in order of first appearance.
///
/// Returns `None` when there is nothing to report.
pub fn compose_digest(
    subject: &str,
    files: &[EpisodeFile],
    feeds: &[FeedRecord],
) -> Option<DigestMessage> {
    if files.is_empty() {
        return None;
    }

    let titles: HashMap<i64, &str> = feeds.iter().map(|f| (f.id, f.display_title())).collect();

    let mut order: Vec<i64> = Vec::new();
    let mut groups: HashMap<i64, Vec<&EpisodeFile>> = HashMap::new();
    for file in files {
        groups
            .entry(file.feed_id)
            .or_insert_with(|| {
                order.push(file.feed_id);
                Vec::new()
            })
            .push(file);
    }

    let mut body = format!("{}\n", subject);
    for feed_id in order {
        let heading = titles
            .get(&feed_id)
            .map(|t| t.to_string())
            .unwrap_or_else(|| format!("Feed {}", feed_id));
        body.push_str(&format!("\n== {} ==\n", heading));

        for file in groups.get(&feed_id).into_iter().flatten() {
            body.push_str(&format!(
                "- {} ({}, {:.1} MB)\n  {}\n",
                file.title,
                file.published_at.format("%Y-%m-%d"),
                size_mb(file.size_bytes),
                file.storage_link
            ));
        }
    }

    Some(DigestMessage {
        subject: subject.to_string(),
        body,
    })
}

/// Writes each digest as a timestamped message file in a directory.
#[derive(Debug, Clone)]
pub struct OutboxSink {
    dir: PathBuf,
}

impl OutboxSink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn render(message: &DigestMessage, recipients: &[Subscriber], now: DateTime<Utc>) -> String {
        let to = recipients
            .iter()
            .map(|r| format!("{} <{}>", r.name, r.email))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "To: {}\nSubject: {}\nDate: {}\nContent-Type: text/plain; charset=utf-8\n\n{}",
            to,
            message.subject,
            now.to_rfc2822(),
            message.body
        )
    }
}

#[async_trait]
impl DigestSink for OutboxSink {
    async fn deliver(
        &self,
        message: &DigestMessage,
        recipients: &[Subscriber],
    ) -> Result<(), DigestError> {
        let now = Utc::now();
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = format!("digest-{}.eml", now.format("%Y%m%dT%H%M%SZ"));
        let path = unique_path(&self.dir, &name).await;

        tokio::fs::write(&path, Self::render(message, recipients, now)).await?;
        tracing::info!(path = %path.display(), recipients = recipients.len(), "Digest written to outbox");
        Ok(())
    }
}

/// Deliver every unsent file in one digest.
///
/// Returns `Ok(None)` when nothing is pending or there is nobody to send to;
/// in the latter case the files stay unsent.
pub async fn deliver_pending(
    db: &Database,
    sink: &dyn DigestSink,
    subject: &str,
) -> Result<Option<DigestOutcome>, DigestError> {
    let db_err = |e: anyhow::Error| DigestError::Database(e.to_string());

    let files = db.unsent_episode_files().await.map_err(db_err)?;
    if files.is_empty() {
        tracing::debug!("No unsent episodes, skipping digest");
        return Ok(None);
    }

    let recipients = db.list_subscribers().await.map_err(db_err)?;
    if recipients.is_empty() {
        tracing::warn!(pending = files.len(), "No subscribers, digest deferred");
        return Ok(None);
    }

    let feeds = db.list_feeds().await.map_err(db_err)?;
    let Some(message) = compose_digest(subject, &files, &feeds) else {
        return Ok(None);
    };

    sink.deliver(&message, &recipients).await?;

    let ids: Vec<i64> = files.iter().map(|f| f.id).collect();
    db.mark_sent(&ids).await.map_err(db_err)?;

    Ok(Some(DigestOutcome {
        files: files.len(),
        recipients: recipients.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewEpisodeFile;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn file(id: i64, feed_id: i64, title: &str, size: u64) -> EpisodeFile {
        EpisodeFile {
            id,
            feed_id,
            entry_id: format!("e{}", id),
            title: title.to_string(),
            description: String::new(),
            source_url: format!("https://cdn.test/{}.mp3", id),
            storage_link: format!("file:///srv/{}.mp3", id),
            slot: "main".to_string(),
            size_bytes: size,
            published_at: Utc.with_ymd_and_hms(2025, 10, 7, 9, 0, 0).unwrap(),
            sent: false,
        }
    }

    fn feed(id: i64, title: Option<&str>) -> FeedRecord {
        FeedRecord {
            id,
            url: format!("https://feeds.test/{}", id),
            title: title.map(str::to_string),
            description: None,
            etag: String::new(),
            last_entry_id: String::new(),
            last_entry_date: None,
            last_synced: None,
            error: None,
        }
    }

    #[test]
    fn test_compose_groups_by_feed_in_first_appearance_order() {
        let files = vec![
            file(1, 2, "B one", 1024 * 1024),
            file(2, 1, "A one", 3 * 1024 * 1024 / 2),
            file(3, 2, "B two", 0),
        ];
        let feeds = vec![feed(1, Some("Show A")), feed(2, None)];

        let message = compose_digest("New episodes", &files, &feeds).unwrap();
        assert_eq!(
            message.body,
            "New episodes\n\
             \n== https://feeds.test/2 ==\n\
             - B one (2025-10-07, 1.0 MB)\n  file:///srv/1.mp3\n\
             - B two (2025-10-07, 0.0 MB)\n  file:///srv/3.mp3\n\
             \n== Show A ==\n\
             - A one (2025-10-07, 1.5 MB)\n  file:///srv/2.mp3\n"
        );
    }

    #[test]
    fn test_compose_nothing_to_report() {
        assert!(compose_digest("x", &[], &[]).is_none());
    }

    #[test]
    fn test_render_lists_recipients() {
        let message = DigestMessage {
            subject: "Hi".to_string(),
            body: "body\n".to_string(),
        };
        let recipients = vec![
            Subscriber {
                id: 1,
                name: "Dana".to_string(),
                email: "dana@example.com".to_string(),
            },
            Subscriber {
                id: 2,
                name: "Lee".to_string(),
                email: "lee@example.org".to_string(),
            },
        ];
        let now = Utc.with_ymd_and_hms(2025, 10, 8, 6, 0, 0).unwrap();
        let text = OutboxSink::render(&message, &recipients, now);
        assert!(text.starts_with("To: Dana <dana@example.com>, Lee <lee@example.org>\nSubject: Hi\n"));
        assert!(text.ends_with("\n\nbody\n"));
    }

    struct FailingSink;

    #[async_trait]
    impl DigestSink for FailingSink {
        async fn deliver(&self, _: &DigestMessage, _: &[Subscriber]) -> Result<(), DigestError> {
            Err(DigestError::Sink("relay refused".to_string()))
        }
    }

    #[derive(Default)]
    struct CapturingSink {
        messages: Mutex<Vec<DigestMessage>>,
    }

    #[async_trait]
    impl DigestSink for CapturingSink {
        async fn deliver(&self, message: &DigestMessage, _: &[Subscriber]) -> Result<(), DigestError> {
            self.messages.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    async fn db_with_pending() -> Database {
        let db = Database::open(":memory:").await.unwrap();
        let feed_id = db.register_feed("https://feeds.test/1", Some("Show"), None).await.unwrap();
        db.insert_episode_file(&NewEpisodeFile {
            feed_id,
            entry_id: "e1".to_string(),
            title: "First".to_string(),
            description: String::new(),
            source_url: "https://cdn.test/1.mp3".to_string(),
            storage_link: "file:///srv/First.mp3".to_string(),
            slot: "main".to_string(),
            size_bytes: 2048,
            published_at: Utc.with_ymd_and_hms(2025, 10, 7, 9, 0, 0).unwrap(),
        })
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_files_unsent() {
        let db = db_with_pending().await;
        db.add_subscriber("dana@example.com", "Dana").await.unwrap();

        let result = deliver_pending(&db, &FailingSink, "New").await;
        assert!(matches!(result, Err(DigestError::Sink(_))));
        assert_eq!(db.unsent_episode_files().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_successful_delivery_marks_sent_once() {
        let db = db_with_pending().await;
        db.add_subscriber("dana@example.com", "Dana").await.unwrap();
        let sink = CapturingSink::default();

        let outcome = deliver_pending(&db, &sink, "New").await.unwrap().unwrap();
        assert_eq!(outcome.files, 1);
        assert_eq!(outcome.recipients, 1);
        assert!(db.unsent_episode_files().await.unwrap().is_empty());

        assert!(deliver_pending(&db, &sink, "New").await.unwrap().is_none());
        assert_eq!(sink.messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_subscribers_defers_digest() {
        let db = db_with_pending().await;
        let sink = CapturingSink::default();

        assert!(deliver_pending(&db, &sink, "New").await.unwrap().is_none());
        assert!(sink.messages.lock().unwrap().is_empty());
        assert_eq!(db.unsent_episode_files().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_outbox_sink_writes_message_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = OutboxSink::new(dir.path().join("outbox"));
        let message = DigestMessage {
            subject: "New".to_string(),
            body: "hello\n".to_string(),
        };
        sink.deliver(&message, &[]).await.unwrap();
        sink.deliver(&message, &[]).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("outbox"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 2);
        let text = std::fs::read_to_string(&entries[0]).unwrap();
        assert!(text.contains("Subject: New\n"));
        assert!(text.ends_with("hello\n"));
    }
}
