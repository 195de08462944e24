//! Effective limits for a single evaluation.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::config::MAX_DURATION_MINUTES;

/// Per-call overrides of the configured limits.
///
/// Zero durations are ignored; a zero `requests` disables limiting for the
/// call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOverrides {
    #[serde(default)]
    pub requests: Option<u64>,
    #[serde(default, alias = "duration")]
    pub window_minutes: Option<u64>,
    #[serde(default, alias = "block_duration")]
    pub block_minutes: Option<u64>,
}

impl LimitOverrides {
    pub fn is_empty(&self) -> bool {
        self.requests.is_none() && self.window_minutes.is_none() && self.block_minutes.is_none()
    }
}

/// The limits that apply to one evaluation: the configured base merged with
/// any per-call overrides. Never written back to shared configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveLimits {
    /// Requests allowed per window; `0` means unlimited
    pub requests: u64,
    /// Fixed window length
    pub window: Duration,
    /// Block length once the limit is hit
    pub block: Duration,
}

impl EffectiveLimits {
    /// Create limits from minute counts, clamped to the supported range.
    pub fn new(requests: u64, window_minutes: u64, block_minutes: u64) -> Self {
        Self {
            requests,
            window: minutes(window_minutes),
            block: minutes(block_minutes),
        }
    }

    /// Merge call-scoped overrides into a copy of these limits.
    pub fn with_overrides(self, overrides: &LimitOverrides) -> Self {
        Self {
            requests: overrides.requests.unwrap_or(self.requests),
            window: match overrides.window_minutes {
                Some(m) if m > 0 => minutes(m),
                _ => self.window,
            },
            block: match overrides.block_minutes {
                Some(m) if m > 0 => minutes(m),
                _ => self.block,
            },
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.requests == 0
    }
}

fn minutes(m: u64) -> Duration {
    Duration::minutes(m.min(MAX_DURATION_MINUTES) as i64)
}
