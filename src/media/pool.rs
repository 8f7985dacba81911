use serde::Deserialize;
use std::path::PathBuf;

use crate::storage::Database;

/// A quota-limited place to keep archived files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageSlot {
    pub name: String,
    pub path: PathBuf,
    pub quota_bytes: u64,
}

#[derive(Debug, Clone)]
struct SlotState {
    slot: StorageSlot,
    used_bytes: u64,
}

/// Greedy first-fit pool over the configured storage slots.
#[derive(Debug, Clone, Default)]
pub struct StoragePool {
    slots: Vec<SlotState>,
}

impl StoragePool {
    /// Slots with their current usage, in preference order.
    pub fn new(slots: impl IntoIterator<Item = (StorageSlot, u64)>) -> Self {
        Self {
            slots: slots
                .into_iter()
                .map(|(slot, used_bytes)| SlotState { slot, used_bytes })
                .collect(),
        }
    }

    /// Build the pool with usage taken from the files already recorded.
    pub async fn load(db: &Database, slots: &[StorageSlot]) -> anyhow::Result<Self> {
        let mut states = Vec::with_capacity(slots.len());
        for slot in slots {
            let used = db.slot_usage(&slot.name).await?;
            states.push((slot.clone(), used));
        }
        Ok(Self::new(states))
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// First slot whose free space is strictly greater than `size_bytes`.
    pub fn select(&self, size_bytes: u64) -> Option<&StorageSlot> {
        self.slots
            .iter()
            .find(|s| s.slot.quota_bytes.saturating_sub(s.used_bytes) > size_bytes)
            .map(|s| &s.slot)
    }

    pub fn free_bytes(&self, name: &str) -> Option<u64> {
        self.slots
            .iter()
            .find(|s| s.slot.name == name)
            .map(|s| s.slot.quota_bytes.saturating_sub(s.used_bytes))
    }

    /// Account for a file placed in slot `name`.
    pub fn record(&mut self, name: &str, size_bytes: u64) {
        if let Some(state) = self.slots.iter_mut().find(|s| s.slot.name == name) {
            state.used_bytes = state.used_bytes.saturating_add(size_bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(name: &str, quota: u64) -> StorageSlot {
        StorageSlot {
            name: name.to_string(),
            path: PathBuf::from(format!("/srv/{}", name)),
            quota_bytes: quota,
        }
    }

    #[test]
    fn test_select_first_fit() {
        let pool = StoragePool::new([(slot("a", 100), 90), (slot("b", 100), 0), (slot("c", 1000), 0)]);
        assert_eq!(pool.select(50).map(|s| s.name.as_str()), Some("b"));
        assert_eq!(pool.select(5).map(|s| s.name.as_str()), Some("a"));
        assert_eq!(pool.select(500).map(|s| s.name.as_str()), Some("c"));
    }

    #[test]
    fn test_select_requires_strictly_more_free_space() {
        let pool = StoragePool::new([(slot("a", 100), 0)]);
        assert!(pool.select(100).is_none());
        assert!(pool.select(99).is_some());
    }

    #[test]
    fn test_record_consumes_capacity() {
        let mut pool = StoragePool::new([(slot("a", 100), 0), (slot("b", 100), 0)]);
        pool.record("a", 60);
        assert_eq!(pool.free_bytes("a"), Some(40));
        assert_eq!(pool.select(50).map(|s| s.name.as_str()), Some("b"));

        pool.record("missing", 10);
        assert_eq!(pool.free_bytes("missing"), None);
    }

    #[test]
    fn test_overcommitted_slot_has_no_free_space() {
        let pool = StoragePool::new([(slot("a", 100), 150)]);
        assert_eq!(pool.free_bytes("a"), Some(0));
        assert!(pool.select(0).is_none());
    }

    #[test]
    fn test_empty_pool_selects_nothing() {
        let pool = StoragePool::default();
        assert!(pool.is_empty());
        assert!(pool.select(1).is_none());
    }

    #[tokio::test]
    async fn test_load_reads_usage_from_database() {
        use crate::storage::NewEpisodeFile;
        use chrono::Utc;

        let db = Database::open(":memory:").await.unwrap();
        let feed_id = db.register_feed("https://a.test/f", None, None).await.unwrap();
        db.insert_episode_file(&NewEpisodeFile {
            feed_id,
            entry_id: "e1".to_string(),
            title: "E1".to_string(),
            description: String::new(),
            source_url: "https://a.test/e1.mp3".to_string(),
            storage_link: "file:///srv/a/E1.mp3".to_string(),
            slot: "a".to_string(),
            size_bytes: 70,
            published_at: Utc::now(),
        })
        .await
        .unwrap();

        let pool = StoragePool::load(&db, &[slot("a", 100), slot("b", 100)])
            .await
            .unwrap();
        assert_eq!(pool.free_bytes("a"), Some(30));
        assert_eq!(pool.free_bytes("b"), Some(100));
    }
}
