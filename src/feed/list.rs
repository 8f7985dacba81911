use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedListError {
    #[error("Line {line}: invalid URL '{value}'")]
    InvalidUrl { line: usize, value: String },

    #[error("Line {line}: unsupported scheme '{scheme}' (only http/https allowed)")]
    UnsupportedScheme { line: usize, scheme: String },
}

/// Parse a plain-text feed list: one URL per line.
///
/// Blank lines, lines shorter than four characters and `#` comments are
/// ignored. Duplicates are dropped, keeping the first occurrence.
pub fn parse_feed_list(text: &str) -> Result<Vec<String>, FeedListError> {
    let mut urls: Vec<String> = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let value = line.trim();
        if value.len() < 4 || value.starts_with('#') {
            continue;
        }

        let url = Url::parse(value).map_err(|_| FeedListError::InvalidUrl {
            line: line_no,
            value: value.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(FeedListError::UnsupportedScheme {
                    line: line_no,
                    scheme: scheme.to_string(),
                })
            }
        }

        let normalized = url.to_string();
        if !urls.contains(&normalized) {
            urls.push(normalized);
        }
    }

    Ok(urls)
}
