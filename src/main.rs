use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use podwatch::config::Config;
use podwatch::digest::{deliver_pending, DigestOutcome, OutboxSink};
use podwatch::feed::{parse_feed_list, Extractor, FeedSource, HttpFeedSource};
use podwatch::media::{ArchiveReport, Archiver, StoragePool};
use podwatch::storage::{parse_subscriber_list, Database, DatabaseError};
use podwatch::sync::{CursorStore, SyncEngine, SyncReport};

/// Get the config directory path (~/.config/podwatch/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("podwatch"))
}

#[derive(Parser, Debug)]
#[command(name = "podwatch", about = "Watch podcast feeds for new episodes")]
struct Args {
    /// Config file (default: ~/.config/podwatch/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register feeds from a file with one URL per line
    AddFeeds { file: PathBuf },

    /// Add subscribers from a file of `email -- name` lines
    AddSubscribers { file: PathBuf },

    /// List registered feeds and their sync state
    Feeds,

    /// Check every feed for new episodes, archive them and send the digest
    Sync {
        /// Ignore episodes published before this date (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        cutoff: Option<NaiveDate>,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,

        /// Skip downloading enclosures
        #[arg(long)]
        no_archive: bool,

        /// Skip digest delivery
        #[arg(long)]
        no_digest: bool,
    },
}

#[derive(Serialize)]
struct RunSummary<'a> {
    sync: &'a SyncReport,
    archive: Option<ArchiveReport>,
    digest: Option<DigestOutcome>,
}

fn init_tracing(verbose: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_list_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn http_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

async fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            anyhow::bail!("Another podwatch run appears to hold the database. Try again later.")
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

async fn add_feeds(db: &Database, config: &Config, file: &Path) -> Result<()> {
    let urls = parse_feed_list(&read_list_file(file)?).context("Invalid feed list")?;
    let source = HttpFeedSource::new(http_client(config)?).with_max_feed_size(config.max_feed_bytes);

    for url in &urls {
        let feed_id = db
            .register_feed(url, None, None)
            .await
            .with_context(|| format!("Failed to register {}", url))?;

        // Metadata is a nicety; an unreachable feed stays registered.
        match source.fetch(url, None).await {
            Ok(fetched) => {
                db.record_metadata(
                    feed_id,
                    fetched.title.as_deref(),
                    fetched.description.as_deref(),
                )
                .await?;
                println!("Added {} ({})", fetched.title.as_deref().unwrap_or(url), url);
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Registered feed without metadata");
                println!("Added {} (metadata unavailable: {})", url, e);
            }
        }
    }
    Ok(())
}

async fn add_subscribers(db: &Database, file: &Path) -> Result<()> {
    let entries = parse_subscriber_list(&read_list_file(file)?).context("Invalid subscriber list")?;
    let mut added = 0;
    for (email, name) in &entries {
        if db.add_subscriber(email, name).await? {
            added += 1;
        }
    }
    println!("Added {} of {} subscribers", added, entries.len());
    Ok(())
}

async fn list_feeds(db: &Database) -> Result<()> {
    let feeds = db.list_feeds().await?;
    if feeds.is_empty() {
        println!("No feeds registered. Use `podwatch add-feeds <FILE>`.");
        return Ok(());
    }
    for feed in feeds {
        let synced = feed
            .last_synced
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!("{:>4}  {}  [synced: {}]", feed.id, feed.display_title(), synced);
        println!("      {}", feed.url);
        if let Some(error) = &feed.error {
            println!("      last error: {}", error);
        }
    }
    Ok(())
}

struct SyncOptions {
    cutoff: Option<NaiveDate>,
    json: bool,
    no_archive: bool,
    no_digest: bool,
}

async fn run_sync(db: &Database, config: &Config, base_dir: &Path, opts: SyncOptions) -> Result<()> {
    let cutoff = opts
        .cutoff
        .unwrap_or_else(|| config.cutoff(Utc::now().date_naive()));
    let client = http_client(config)?;

    let source = HttpFeedSource::new(client.clone())
        .with_timeout(Duration::from_secs(config.request_timeout_secs))
        .with_max_feed_size(config.max_feed_bytes);
    let engine = SyncEngine::new(source, db.clone(), Extractor::new(&config.audio_extensions))
        .with_span(tracing::info_span!("run", %cutoff));

    let feeds = db.list_feeds().await.context("Failed to load feeds")?;
    let report = engine.sync_all(&feeds, cutoff).await;

    let archive = if opts.no_archive {
        None
    } else if config.storage.is_empty() {
        tracing::warn!("No storage slots configured, skipping archive");
        None
    } else {
        let pool = StoragePool::load(db, &config.storage_slots(base_dir))
            .await
            .context("Failed to read storage usage")?;
        let mut archiver = Archiver::new(db.clone(), client, config.media_dir(base_dir), pool);
        Some(archiver.archive_all(&report.episodes).await)
    };

    let digest = if opts.no_digest {
        None
    } else {
        let sink = OutboxSink::new(config.outbox_dir(base_dir));
        match deliver_pending(db, &sink, &config.digest_subject).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "Digest delivery failed, files stay queued");
                None
            }
        }
    };

    if opts.json {
        let summary = RunSummary {
            sync: &report,
            archive,
            digest,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for episode in &report.episodes {
        println!(
            "{}  {}  {}",
            episode.published_at.format("%Y-%m-%d"),
            episode.title,
            episode.enclosure_url.as_deref().unwrap_or("-")
        );
    }
    for failure in &report.failures {
        eprintln!("Failed: {} ({})", failure.url, failure.error);
    }
    println!(
        "{} new episodes from {} feeds, {} feeds failed",
        report.episodes.len(),
        report.feeds_synced,
        report.failures.len()
    );
    if let Some(archive) = &archive {
        println!(
            "Archived {}, skipped {}, failed {}",
            archive.stored.len(),
            archive.skipped,
            archive.failed.len()
        );
    }
    if let Some(digest) = &digest {
        println!("Digest of {} episodes sent to {} subscribers", digest.files, digest.recipients);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let base_dir = Config::base_dir(&config_path);

    let db_path = args
        .database
        .clone()
        .unwrap_or_else(|| config.database_path(&base_dir));
    let db = open_database(&db_path).await?;

    match args.command {
        Command::AddFeeds { file } => add_feeds(&db, &config, &file).await,
        Command::AddSubscribers { file } => add_subscribers(&db, &file).await,
        Command::Feeds => list_feeds(&db).await,
        Command::Sync {
            cutoff,
            json,
            no_archive,
            no_digest,
        } => {
            let opts = SyncOptions {
                cutoff,
                json,
                no_archive,
                no_digest,
            };
            run_sync(&db, &config, &base_dir, opts).await
        }
    }
}
