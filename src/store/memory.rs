//! In-process record store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;

use super::{RateRecord, RecordStore, SweepBatch};
use crate::error::Result;

/// A record store backed by a sharded concurrent map.
///
/// Per-key atomicity comes from the shard lock held by the map entry for the
/// duration of [`RecordStore::apply`]. Swept records can be kept in an
/// in-memory history list.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Live records indexed by composite key
    records: DashMap<String, RateRecord>,
    /// Archived records, oldest first
    history: RwLock<Vec<RateRecord>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of the record for a key.
    pub fn get(&self, key: &str) -> Option<RateRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy of the archived records.
    pub fn history(&self) -> Vec<RateRecord> {
        self.history.read().clone()
    }

    /// Insert or replace a record outside the admission path.
    pub fn put(&self, record: RateRecord) {
        self.records.insert(record.key.clone(), record);
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find(&self, key: &str) -> Result<Option<RateRecord>> {
        Ok(self.get(key))
    }

    async fn apply<T, F>(&self, key: &str, plan: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(Option<&RateRecord>) -> (Option<RateRecord>, T) + Send,
    {
        let result = match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let (write, result) = plan(Some(entry.get()));
                if let Some(record) = write {
                    entry.insert(record);
                }
                result
            }
            Entry::Vacant(entry) => {
                let (write, result) = plan(None);
                if let Some(record) = write {
                    entry.insert(record);
                }
                result
            }
        };

        trace!(key = %key, "Applied record plan");
        Ok(result)
    }

    async fn sweep_batch(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
        archive: bool,
    ) -> Result<SweepBatch> {
        let expired = |record: &RateRecord| record.last_seen_at <= cutoff && !record.is_blocked_at(now);

        let candidates: Vec<String> = self
            .records
            .iter()
            .filter(|entry| expired(entry.value()))
            .map(|entry| entry.key().clone())
            .take(limit)
            .collect();

        let scanned = candidates.len();
        let mut removed = 0;
        for key in candidates {
            // Re-check under the shard lock; the record may have been touched since.
            if let Some((_, record)) = self.records.remove_if(&key, |_, record| expired(record)) {
                if archive {
                    self.history.write().push(record);
                }
                removed += 1;
            }
        }

        Ok(SweepBatch { scanned, removed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::BTreeMap;

    fn record(key: &str, last_seen_at: DateTime<Utc>) -> RateRecord {
        RateRecord {
            key: key.to_string(),
            fields: BTreeMap::new(),
            ip_address: "1.2.3.4".to_string(),
            request_url: "/login".to_string(),
            window_started_at: last_seen_at,
            window_hits: 1,
            blocked_until: None,
            created_at: last_seen_at,
            last_seen_at,
        }
    }

    #[tokio::test]
    async fn test_apply_creates_then_replaces() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let seen = store
            .apply("k", |existing| (Some(record("k", now)), existing.is_some()))
            .await
            .unwrap();
        assert!(!seen);

        let seen = store
            .apply("k", |existing| {
                let mut next = existing.cloned().unwrap();
                next.window_hits += 1;
                (Some(next), true)
            })
            .await
            .unwrap();
        assert!(seen);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("k").unwrap().window_hits, 2);
    }

    #[tokio::test]
    async fn test_apply_without_write_leaves_row() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.put(record("k", now));

        store.apply("k", |_| (None, ())).await.unwrap();
        store.apply("other", |_| (None, ())).await.unwrap();

        assert_eq!(store.get("k"), Some(record("k", now)));
        assert!(store.find("other").await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_batch_respects_cutoff_limit_and_blocks() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let old = now - Duration::hours(2);

        store.put(record("old-1", old));
        store.put(record("old-2", old));
        store.put(record("fresh", now));
        let mut blocked = record("old-blocked", old);
        blocked.blocked_until = Some(now + Duration::minutes(5));
        store.put(blocked);

        let cutoff = now - Duration::hours(1);
        let batch = store.sweep_batch(cutoff, now, 1, true).await.unwrap();
        assert_eq!(batch, SweepBatch { scanned: 1, removed: 1 });

        let batch = store.sweep_batch(cutoff, now, 10, true).await.unwrap();
        assert_eq!(batch, SweepBatch { scanned: 1, removed: 1 });

        assert!(store.get("fresh").is_some());
        assert!(store.get("old-blocked").is_some());
        assert_eq!(store.len(), 2);
        assert_eq!(store.history().len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_batch_without_archive() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.put(record("old", now - Duration::hours(2)));

        let batch = store
            .sweep_batch(now - Duration::hours(1), now, 10, false)
            .await
            .unwrap();

        assert_eq!(batch.removed, 1);
        assert!(store.is_empty());
        assert!(store.history().is_empty());
    }
}
