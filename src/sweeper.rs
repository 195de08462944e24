//! Periodic removal of idle records.
//!
//! The sweeper runs outside the request path. Only one sweep runs at a
//! time per sweeper; a sweep requested while another is in flight returns
//! immediately.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::store::RecordStore;

/// Summary of one completed sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Records last seen at or before this instant were eligible
    pub cutoff: DateTime<Utc>,
    /// Records removed from the primary store
    pub removed: usize,
    /// Store round trips made
    pub batches: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(SweepReport),
    /// Another sweep was already running
    AlreadyRunning,
}

/// Removes records idle for longer than the retention window.
pub struct RetentionSweeper<S: RecordStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    archive: bool,
    running: Mutex<()>,
}

impl<S: RecordStore> RetentionSweeper<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, archive: bool) -> Self {
        Self {
            store,
            clock,
            archive,
            running: Mutex::new(()),
        }
    }

    /// Remove records last seen more than `retention` ago, `batch_size` at a
    /// time, skipping keys whose block is still live.
    pub async fn sweep(&self, retention: Duration, batch_size: usize) -> Result<SweepOutcome> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("Sweep already in progress, skipping");
            return Ok(SweepOutcome::AlreadyRunning);
        };

        let batch_size = batch_size.max(1);
        let now = self.clock.now();
        let cutoff = now - retention;
        let mut removed = 0;
        let mut batches = 0;

        loop {
            let batch = self
                .store
                .sweep_batch(cutoff, now, batch_size, self.archive)
                .await?;
            removed += batch.removed;
            batches += 1;
            // Rows touched mid-batch are skipped, so only a short scan means done.
            if batch.scanned < batch_size {
                break;
            }
        }

        info!(
            cutoff = %cutoff,
            removed = removed,
            batches = batches,
            archived = self.archive,
            "Retention sweep completed"
        );

        Ok(SweepOutcome::Completed(SweepReport {
            cutoff,
            removed,
            batches,
        }))
    }

    /// Sweep every `every` until `shutdown` flips to `true` or its sender is
    /// dropped. Failed sweeps are logged and retried on the next tick.
    pub async fn run(
        self: Arc<Self>,
        retention: Duration,
        batch_size: usize,
        every: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = every.as_secs(), "Retention sweeper started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(retention, batch_size).await {
                        warn!(error = %e, "Retention sweep failed");
                    }
                }
            }
        }

        info!("Retention sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, RateRecord, SweepBatch};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn record(key: &str, last_seen_at: DateTime<Utc>) -> RateRecord {
        RateRecord {
            key: key.to_string(),
            fields: BTreeMap::new(),
            ip_address: "1.2.3.4".to_string(),
            request_url: "/".to_string(),
            window_started_at: last_seen_at,
            window_hits: 1,
            blocked_until: None,
            created_at: last_seen_at,
            last_seen_at,
        }
    }

    fn seeded(now: DateTime<Utc>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for i in 0..5 {
            store.put(record(&format!("old-{}", i), now - Duration::minutes(30)));
        }
        store.put(record("fresh", now - Duration::minutes(1)));
        store
    }

    #[tokio::test]
    async fn test_sweep_in_batches() {
        let now = Utc::now();
        let store = seeded(now);
        let sweeper = RetentionSweeper::new(store.clone(), Arc::new(ManualClock::new(now)), true);

        let outcome = sweeper.sweep(Duration::minutes(10), 2).await.unwrap();

        let SweepOutcome::Completed(report) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(report.removed, 5);
        assert_eq!(report.batches, 3);
        assert_eq!(report.cutoff, now - Duration::minutes(10));
        assert_eq!(store.len(), 1);
        assert_eq!(store.history().len(), 5);
    }

    /// Reports its first batch as fully scanned but untouched, as if every
    /// candidate was refreshed by a request between selection and removal.
    struct ContendedStore {
        inner: MemoryStore,
        contended: AtomicBool,
    }

    #[async_trait]
    impl RecordStore for ContendedStore {
        async fn find(&self, key: &str) -> Result<Option<RateRecord>> {
            self.inner.find(key).await
        }

        async fn apply<T, F>(&self, key: &str, plan: F) -> Result<T>
        where
            T: Send,
            F: FnOnce(Option<&RateRecord>) -> (Option<RateRecord>, T) + Send,
        {
            self.inner.apply(key, plan).await
        }

        async fn sweep_batch(
            &self,
            cutoff: DateTime<Utc>,
            now: DateTime<Utc>,
            limit: usize,
            archive: bool,
        ) -> Result<SweepBatch> {
            if self.contended.swap(false, Ordering::SeqCst) {
                return Ok(SweepBatch { scanned: limit, removed: 0 });
            }
            self.inner.sweep_batch(cutoff, now, limit, archive).await
        }
    }

    #[tokio::test]
    async fn test_sweep_continues_past_contended_batch() {
        let now = Utc::now();
        let inner = MemoryStore::new();
        for i in 0..3 {
            inner.put(record(&format!("old-{}", i), now - Duration::minutes(30)));
        }
        let store = Arc::new(ContendedStore {
            inner,
            contended: AtomicBool::new(true),
        });
        let sweeper = RetentionSweeper::new(store.clone(), Arc::new(ManualClock::new(now)), false);

        let outcome = sweeper.sweep(Duration::minutes(10), 2).await.unwrap();

        let SweepOutcome::Completed(report) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(report.removed, 3);
        assert_eq!(report.batches, 3);
        assert!(store.inner.is_empty());
    }

    #[tokio::test]
    async fn test_zero_batch_size_still_terminates() {
        let now = Utc::now();
        let store = seeded(now);
        let sweeper = RetentionSweeper::new(store.clone(), Arc::new(ManualClock::new(now)), false);

        sweeper.sweep(Duration::minutes(10), 0).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.history().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_is_single_flight() {
        let now = Utc::now();
        let sweeper = RetentionSweeper::new(seeded(now), Arc::new(ManualClock::new(now)), false);

        let _held = sweeper.running.lock().await;
        let outcome = sweeper.sweep(Duration::minutes(10), 10).await.unwrap();
        assert_eq!(outcome, SweepOutcome::AlreadyRunning);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let now = Utc::now();
        let store = seeded(now);
        let sweeper = Arc::new(RetentionSweeper::new(store.clone(), Arc::new(ManualClock::new(now)), false));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(sweeper.run(
            Duration::minutes(10),
            10,
            std::time::Duration::from_millis(10),
            rx,
        ));

        // The first tick fires immediately.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(store.len(), 1);
    }
}
