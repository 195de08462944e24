//! Persisting the outcome of a counted request.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::block::{self, BlockState};
use super::key::TrackingKey;
use super::limits::EffectiveLimits;
use super::window::WindowPosition;
use crate::error::Result;
use crate::store::{RateRecord, RecordStore};

/// Observational data stored alongside the counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetadata {
    pub ip_address: String,
    pub request_url: String,
}

/// Result of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordResult {
    pub success: bool,
    pub blocked_on_this_request: bool,
    pub blocked_until: Option<DateTime<Utc>>,
    /// Hits in the window after this request
    pub window_hits: u64,
}

/// What the recorder did for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The request was counted and the record replaced
    Recorded(RecordResult),
    /// A concurrent request blocked the key first; nothing was written
    AlreadyBlocked(DateTime<Utc>),
}

/// Upserts per-key records through a [`RecordStore`].
///
/// Counting, the block decision and the write run as one atomic plan per
/// key, so concurrent requests for the same key cannot both observe the
/// same count.
pub struct Recorder<S: RecordStore> {
    store: Arc<S>,
}

impl<S: RecordStore> Recorder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Count this request and persist the outcome.
    pub async fn record(
        &self,
        key: &TrackingKey,
        metadata: &RequestMetadata,
        limits: EffectiveLimits,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome> {
        let stored_key = key.to_string_key();
        let fields = key.fields();
        let plan_key = stored_key.clone();
        let metadata = metadata.clone();

        let outcome = self
            .store
            .apply(&stored_key, move |existing| {
                plan(existing, plan_key, fields, metadata, limits, now)
            })
            .await
            .map_err(|e| {
                warn!(key = %stored_key, error = %e, "Failed to record request");
                e
            })?;

        if let RecordOutcome::Recorded(result) = &outcome {
            debug!(
                key = %stored_key,
                hits = result.window_hits,
                blocked = result.blocked_on_this_request,
                "Request recorded"
            );
        }

        Ok(outcome)
    }
}

/// Build the replacement record for one request against the current row.
fn plan(
    existing: Option<&RateRecord>,
    key: String,
    fields: BTreeMap<String, String>,
    metadata: RequestMetadata,
    limits: EffectiveLimits,
    now: DateTime<Utc>,
) -> (Option<RateRecord>, RecordOutcome) {
    if let BlockState::Blocked { until } = BlockState::of(existing, now) {
        return (None, RecordOutcome::AlreadyBlocked(until));
    }

    let position = WindowPosition::locate(existing, limits.window, now);
    let should_block = block::decide_should_block(limits.requests, position.prior_hits);
    let blocked_until = should_block.then(|| block::block_until(now, &limits));
    let window_hits = position.prior_hits.saturating_add(1);

    let record = RateRecord {
        key,
        fields,
        ip_address: metadata.ip_address,
        request_url: metadata.request_url,
        window_started_at: position.started_at,
        window_hits,
        blocked_until,
        created_at: existing.map_or(now, |r| r.created_at),
        last_seen_at: now,
    };

    let result = RecordResult {
        success: true,
        blocked_on_this_request: should_block,
        blocked_until,
        window_hits,
    };

    (Some(record), RecordOutcome::Recorded(result))
}
