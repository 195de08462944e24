//! Persistence for per-key admission records.
//!
//! The limiter never touches storage directly; it goes through
//! [`RecordStore`], which any backend (in-process map, SQL table with a
//! unique key constraint, ...) can implement as long as [`RecordStore::apply`]
//! is atomic per key.

mod memory;
mod record;

pub use memory::MemoryStore;
pub use record::RateRecord;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Trait for record store implementations.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read the record for a key without modifying it.
    async fn find(&self, key: &str) -> Result<Option<RateRecord>>;

    /// Atomically read, transform and replace the record for a key.
    ///
    /// `plan` sees the current record (if any) and returns the record to
    /// store (or `None` to leave the row untouched) together with a value
    /// handed back to the caller. No other `apply` for the same key may
    /// interleave between the read and the write.
    async fn apply<T, F>(&self, key: &str, plan: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(Option<&RateRecord>) -> (Option<RateRecord>, T) + Send;

    /// Remove up to `limit` records last seen at or before `cutoff` whose
    /// block is not live at `now`, archiving them first when `archive` is set.
    ///
    /// A candidate touched between selection and removal is kept and still
    /// counts as scanned.
    async fn sweep_batch(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
        archive: bool,
    ) -> Result<SweepBatch>;
}

/// Result of one [`RecordStore::sweep_batch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepBatch {
    /// Expired candidates selected, at most `limit`
    pub scanned: usize,
    /// Candidates actually removed
    pub removed: usize,
}
