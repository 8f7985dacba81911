use chrono::{DateTime, Utc};
use feed_rs::parser;
use sha2::{Digest, Sha256};

/// A feed entry mapped onto explicit, typed fields.
///
/// Absent fields stay `None`; nothing is defaulted here so the extractor can
/// decide what an absent field means.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub id: String,
    pub published: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub summary: Option<String>,
    /// Candidate URLs in document order: entry links, then enclosure/media URLs
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Entries in the order the document lists them (newest-first by convention)
    pub entries: Vec<RawEntry>,
}

pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, parser::ParseFeedError> {
    // feed-rs otherwise invents a random UUID for entries without a guid or
    // link; leave those ids empty so `generate_entry_id` can hash them.
    let feed = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let mut links: Vec<String> = entry.links.into_iter().map(|l| l.href).collect();
            links.extend(
                entry
                    .media
                    .into_iter()
                    .flat_map(|m| m.content)
                    .filter_map(|c| c.url.map(|u| u.to_string())),
            );

            // Atom feeds frequently carry only <updated>
            let published = entry.published.or(entry.updated);
            let title = entry.title.map(|t| t.content);
            let summary = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));

            let existing_id = if entry.id.is_empty() {
                None
            } else {
                Some(entry.id.as_str())
            };
            let id = generate_entry_id(
                existing_id,
                links.first().map(String::as_str),
                title.as_deref().unwrap_or(""),
                published,
            );

            RawEntry {
                id,
                published,
                title,
                summary,
                links,
            }
        })
        .collect();

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content),
        description: feed.description.map(|d| d.content),
        entries,
    })
}

/// Stable fallback ID for entries that carry none, so the boundary check
/// still has something to compare against on the next run.
fn generate_entry_id(
    existing: Option<&str>,
    url: Option<&str>,
    title: &str,
    published: Option<DateTime<Utc>>,
) -> String {
    if let Some(id) = existing {
        let trimmed = id.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        url.unwrap_or(""),
        title,
        published.map(|p| p.timestamp().to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
