use anyhow::Result;
use thiserror::Error;

use super::schema::Database;
use super::types::Subscriber;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Line {line}: expected 'email -- name', got '{value}'")]
pub struct SubscriberLineError {
    pub line: usize,
    pub value: String,
}

/// Parse a subscriber list with one `email -- name` pair per line.
///
/// Blank lines and lines shorter than four characters are ignored.
pub fn parse_subscriber_list(text: &str) -> Result<Vec<(String, String)>, SubscriberLineError> {
    let mut subscribers = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let value = line.trim();
        if value.len() < 4 {
            continue;
        }

        let malformed = || SubscriberLineError {
            line: idx + 1,
            value: value.to_string(),
        };
        let (email, name) = value.split_once(" -- ").ok_or_else(malformed)?;
        let (email, name) = (email.trim(), name.trim());
        if !email.contains('@') || name.is_empty() {
            return Err(malformed());
        }
        subscribers.push((email.to_string(), name.to_string()));
    }

    Ok(subscribers)
}

impl Database {
    // ========================================================================
    // Subscriber Operations
    // ========================================================================

    /// Add a subscriber. An email that is already present is left untouched.
    /// Returns true when a new row was inserted.
    pub async fn add_subscriber(&self, email: &str, name: &str) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO subscribers (name, email) VALUES (?, ?)")
            .bind(name)
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_subscribers(&self) -> Result<Vec<Subscriber>> {
        let rows = sqlx::query_as::<_, Subscriber>(
            "SELECT id, name, email FROM subscribers ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
