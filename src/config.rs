//! Configuration file parser for ~/.config/podwatch/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, but each one is logged as a warning
//! since it is usually a typo.
use chrono::{Days, NaiveDate};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::media::StorageSlot;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Relative paths, slot paths included, are resolved against the directory
/// holding the config file (see [`Config::base_dir`]).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Defaults to `podwatch.db` next to the config file.
    pub database_path: Option<PathBuf>,

    /// Working directory for downloads before they are placed in a slot.
    pub media_dir: Option<PathBuf>,

    /// Where digest messages are written.
    pub outbox_dir: Option<PathBuf>,

    /// Episodes published before today minus this many days are ignored.
    pub cutoff_days: u64,

    /// Link extensions that mark an audio enclosure.
    pub audio_extensions: Vec<String>,

    pub request_timeout_secs: u64,

    /// Largest feed body accepted, in bytes.
    pub max_feed_bytes: usize,

    pub user_agent: String,

    pub digest_subject: String,

    /// Storage slots, filled in order.
    pub storage: Vec<StorageSlot>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            media_dir: None,
            outbox_dir: None,
            cutoff_days: 1,
            audio_extensions: vec!["mp3".to_string()],
            request_timeout_secs: 30,
            max_feed_bytes: 10 * 1024 * 1024,
            user_agent: format!("podwatch/{}", env!("CARGO_PKG_VERSION")),
            digest_subject: "New podcast episodes".to_string(),
            storage: Vec::new(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "database_path",
        "media_dir",
        "outbox_dir",
        "cutoff_days",
        "audio_extensions",
        "request_timeout_secs",
        "max_feed_bytes",
        "user_agent",
        "digest_subject",
        "storage",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            slots = config.storage.len(),
            cutoff_days = config.cutoff_days,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Earliest publish date still reported, relative to `today`.
    pub fn cutoff(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_sub_days(Days::new(self.cutoff_days))
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn database_path(&self, base: &Path) -> PathBuf {
        resolve(base, self.database_path.as_deref(), "podwatch.db")
    }

    pub fn media_dir(&self, base: &Path) -> PathBuf {
        resolve(base, self.media_dir.as_deref(), "media")
    }

    pub fn outbox_dir(&self, base: &Path) -> PathBuf {
        resolve(base, self.outbox_dir.as_deref(), "outbox")
    }

    /// Configured slots with relative paths anchored at `base`.
    pub fn storage_slots(&self, base: &Path) -> Vec<StorageSlot> {
        self.storage
            .iter()
            .map(|slot| StorageSlot {
                path: resolve(base, Some(slot.path.as_path()), &slot.name),
                ..slot.clone()
            })
            .collect()
    }

    /// Directory relative paths in the file at `path` are resolved against.
    pub fn base_dir(path: &Path) -> PathBuf {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

fn resolve(base: &Path, configured: Option<&Path>, default_name: &str) -> PathBuf {
    match configured {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => base.join(p),
        None => base.join(default_name),
    }
}

// ============================================================================
// Tests
// ============================================================================
