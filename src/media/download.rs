use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use url::Url;

use super::MediaError;

/// A file fetched into the working directory.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Build a file name from an episode title.
///
/// Underscores become spaces, anything that is not a letter, digit or
/// whitespace is dropped, and an empty result becomes `untitled`.
pub fn sanitize_file_name(title: &str, extension: &str) -> String {
    let cleaned: String = title
        .replace('_', " ")
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let stem = if cleaned.is_empty() {
        "untitled"
    } else {
        cleaned.as_str()
    };
    format!("{}.{}", stem, extension.trim_start_matches('.'))
}

/// Extension of the enclosure's path, lowercased; `mp3` when there is none.
pub fn enclosure_extension(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path()
                .rsplit('/')
                .next()
                .and_then(|name| name.rsplit_once('.'))
                .map(|(_, ext)| ext.to_lowercase())
        })
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "mp3".to_string())
}

/// First path in `dir` named `file_name` that does not exist yet, adding
/// ` (2)`, ` (3)`, ... before the extension as needed.
pub(crate) async fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }

    let (stem, ext) = file_name.rsplit_once('.').unwrap_or((file_name, ""));
    let mut n = 2;
    loop {
        let name = if ext.is_empty() {
            format!("{} ({})", stem, n)
        } else {
            format!("{} ({}).{}", stem, n, ext)
        };
        let candidate = dir.join(name);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

/// Stream an enclosure to `dest_dir/file_name`.
///
/// Responses that do not declare an `audio/*` content type are rejected
/// before anything is written. A partially written file is removed on error.
pub async fn download_enclosure(
    client: &reqwest::Client,
    url: &str,
    dest_dir: &Path,
    file_name: &str,
) -> Result<DownloadedFile, MediaError> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(MediaError::HttpStatus(response.status().as_u16()));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();
    if !content_type.starts_with("audio/") {
        return Err(MediaError::NotAudio { content_type });
    }

    tokio::fs::create_dir_all(dest_dir).await?;
    let path = unique_path(dest_dir, file_name).await;

    match write_body(response, &path).await {
        Ok(size_bytes) => Ok(DownloadedFile { path, size_bytes }),
        Err(e) => {
            let _ = tokio::fs::remove_file(&path).await;
            Err(e)
        }
    }
}

async fn write_body(response: reqwest::Response, path: &Path) -> Result<u64, MediaError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}
