//! Block state per key.
//!
//! A key is either unblocked or blocked until some instant. Blocks end by
//! the passage of time alone; nothing is written when they lapse, and a
//! request arriving during a block never moves its end.

use chrono::{DateTime, Utc};

use super::limits::EffectiveLimits;
use crate::store::RateRecord;

/// Block state of a key at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Unblocked,
    Blocked { until: DateTime<Utc> },
}

impl BlockState {
    pub fn of(record: Option<&RateRecord>, now: DateTime<Utc>) -> Self {
        match check_already_blocked(record, now) {
            Some(until) => BlockState::Blocked { until },
            None => BlockState::Unblocked,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, BlockState::Blocked { .. })
    }
}

/// Return the end of the live block on `record`, if there is one.
pub fn check_already_blocked(record: Option<&RateRecord>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    record
        .filter(|r| r.is_blocked_at(now))
        .and_then(|r| r.blocked_until)
}

/// Whether a request seeing `window_count` prior hits starts a block.
pub fn decide_should_block(requests: u64, window_count: u64) -> bool {
    requests != 0 && window_count >= requests
}

/// End of a block issued at `now`.
pub fn block_until(now: DateTime<Utc>, limits: &EffectiveLimits) -> DateTime<Utc> {
    now + limits.block
}
