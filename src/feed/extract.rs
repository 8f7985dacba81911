use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use super::parser::RawEntry;

/// A new episode surfaced by a sync pass. Not persisted by the sync core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Episode {
    pub feed_id: i64,
    pub entry_id: String,
    pub title: String,
    /// First audio link of the entry; `None` when no link looked like audio
    pub enclosure_url: Option<String>,
    pub description: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    /// Without a publish date the entry cannot be placed against the cutoff
    #[error("Entry {entry_id} has no publish date")]
    MissingPublishDate { entry_id: String },
}

/// Maps raw entries to episodes and picks the audio enclosure.
#[derive(Debug, Clone)]
pub struct Extractor {
    audio_extensions: Vec<String>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(["mp3"])
    }
}

impl Extractor {
    /// Extensions are matched case-insensitively, with or without a leading dot.
    pub fn new<I, S>(audio_extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let audio_extensions = audio_extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { audio_extensions }
    }

    pub fn extract(&self, feed_id: i64, entry: &RawEntry) -> Result<Episode, ExtractionError> {
        let published_at = entry
            .published
            .ok_or_else(|| ExtractionError::MissingPublishDate {
                entry_id: entry.id.clone(),
            })?;

        Ok(Episode {
            feed_id,
            entry_id: entry.id.clone(),
            title: entry.title.clone().unwrap_or_default(),
            enclosure_url: self.select_enclosure(&entry.links).map(str::to_string),
            description: entry.summary.clone().unwrap_or_default(),
            published_at,
        })
    }

    /// First link whose path ends in a configured audio extension.
    pub fn select_enclosure<'a>(&self, links: &'a [String]) -> Option<&'a str> {
        links
            .iter()
            .map(String::as_str)
            .find(|link| self.is_audio_link(link))
    }

    fn is_audio_link(&self, link: &str) -> bool {
        let path = match Url::parse(link) {
            Ok(url) => url.path().to_string(),
            // Relative or otherwise odd links: drop query and fragment by hand
            Err(_) => link
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string(),
        };

        let file_name = path.rsplit('/').next().unwrap_or_default();
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_lowercase();
                self.audio_extensions.iter().any(|e| *e == ext)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(links: &[&str]) -> RawEntry {
        RawEntry {
            id: "guid-1".to_string(),
            published: Some(Utc.with_ymd_and_hms(2025, 10, 7, 6, 30, 0).unwrap()),
            title: Some("Episode <b>1</b>".to_string()),
            summary: Some("Notes & links".to_string()),
            links: links.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn test_first_audio_link_wins() {
        let extractor = Extractor::default();
        let raw = entry(&[
            "https://example.com/episodes/1",
            "https://cdn.example.com/one.mp3",
            "https://cdn.example.com/two.mp3",
        ]);
        let episode = extractor.extract(3, &raw).unwrap();
        assert_eq!(
            episode.enclosure_url.as_deref(),
            Some("https://cdn.example.com/one.mp3")
        );
        assert_eq!(episode.feed_id, 3);
        assert_eq!(episode.entry_id, "guid-1");
    }

    #[test]
    fn test_query_string_is_ignored_when_matching() {
        let extractor = Extractor::default();
        let raw = entry(&[
            "https://traffic.example.fm/d/clips/abc/audio.mp3?utm_source=Podcast&in_playlist=0ab1",
        ]);
        let episode = extractor.extract(1, &raw).unwrap();
        assert!(episode.enclosure_url.unwrap().ends_with("in_playlist=0ab1"));
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        let extractor = Extractor::new([".MP3", "m4a"]);
        assert!(extractor.is_audio_link("https://x.test/a/Show.Mp3"));
        assert!(extractor.is_audio_link("https://x.test/a/show.M4A"));
        assert!(!extractor.is_audio_link("https://x.test/a/show.ogg"));
    }

    #[test]
    fn test_extension_must_end_the_path() {
        let extractor = Extractor::default();
        assert!(!extractor.is_audio_link("https://x.test/mp3/page.html"));
        assert!(!extractor.is_audio_link("https://x.test/.mp3"));
        assert!(!extractor.is_audio_link("https://x.test/listen?file=a.mp3"));
        assert!(extractor.is_audio_link("/relative/path/a.mp3?x=1"));
    }

    #[test]
    fn test_missing_enclosure_still_yields_episode() {
        let extractor = Extractor::default();
        let raw = entry(&["https://example.com/episodes/1"]);
        let episode = extractor.extract(1, &raw).unwrap();
        assert!(episode.enclosure_url.is_none());
    }

    #[test]
    fn test_text_fields_pass_through_unsanitized() {
        let extractor = Extractor::default();
        let episode = extractor.extract(1, &entry(&[])).unwrap();
        assert_eq!(episode.title, "Episode <b>1</b>");
        assert_eq!(episode.description, "Notes & links");
    }

    #[test]
    fn test_absent_title_and_summary_become_empty() {
        let extractor = Extractor::default();
        let raw = RawEntry {
            title: None,
            summary: None,
            ..entry(&[])
        };
        let episode = extractor.extract(1, &raw).unwrap();
        assert_eq!(episode.title, "");
        assert_eq!(episode.description, "");
    }

    #[test]
    fn test_missing_publish_date_is_error() {
        let extractor = Extractor::default();
        let raw = RawEntry {
            published: None,
            ..entry(&[])
        };
        assert_eq!(
            extractor.extract(1, &raw),
            Err(ExtractionError::MissingPublishDate {
                entry_id: "guid-1".to_string()
            })
        );
    }
}
