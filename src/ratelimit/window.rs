//! Fixed-window request counting.

use chrono::{DateTime, Duration, Utc};

use crate::store::RateRecord;

/// Where a request falls relative to its key's current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPosition {
    /// Start of the window this request counts toward
    pub started_at: DateTime<Utc>,
    /// Requests already recorded in that window
    pub prior_hits: u64,
}

impl WindowPosition {
    /// Locate `now` in the window held by `record`.
    ///
    /// A fresh window opens when there is no record, when the stored window
    /// has elapsed, or when the key's last block has run out.
    pub fn locate(record: Option<&RateRecord>, window: Duration, now: DateTime<Utc>) -> Self {
        let fresh = Self {
            started_at: now,
            prior_hits: 0,
        };

        let Some(record) = record else {
            return fresh;
        };

        if now >= record.window_started_at + window {
            return fresh;
        }

        if record.blocked_until.is_some_and(|until| until <= now) {
            return fresh;
        }

        Self {
            started_at: record.window_started_at,
            prior_hits: record.window_hits,
        }
    }

    /// Time left before the window resets.
    pub fn remaining(&self, window: Duration, now: DateTime<Utc>) -> Duration {
        let end = self.started_at + window;
        if end <= now {
            Duration::zero()
        } else {
            end - now
        }
    }
}

/// Count requests recorded for a key inside the current window.
pub fn count_in_window(record: Option<&RateRecord>, window: Duration, now: DateTime<Utc>) -> u64 {
    WindowPosition::locate(record, window, now).prior_hits
}
