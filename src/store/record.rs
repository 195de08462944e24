//! The per-key record persisted by every store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row per composite tracking key.
///
/// Rows are replaced wholesale on every recorded request; a store never holds
/// two rows for the same `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRecord {
    /// Rendered composite key (primary key)
    pub key: String,
    /// Resource and user field values the key was derived from
    pub fields: BTreeMap<String, String>,
    /// Client IP of the last recorded request
    pub ip_address: String,
    /// URL of the last recorded request
    pub request_url: String,
    /// Start of the current fixed window
    pub window_started_at: DateTime<Utc>,
    /// Requests recorded inside the current window, this one included
    pub window_hits: u64,
    /// End of the block issued for this key, if any
    pub blocked_until: Option<DateTime<Utc>>,
    /// First time this key was recorded
    pub created_at: DateTime<Utc>,
    /// Last time this key was recorded
    pub last_seen_at: DateTime<Utc>,
}

impl RateRecord {
    /// True while the block on this record has not yet run out.
    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(blocked_until: Option<DateTime<Utc>>) -> RateRecord {
        let now = Utc::now();
        RateRecord {
            key: "k".to_string(),
            fields: BTreeMap::new(),
            ip_address: "1.2.3.4".to_string(),
            request_url: "/".to_string(),
            window_started_at: now,
            window_hits: 1,
            blocked_until,
            created_at: now,
            last_seen_at: now,
        }
    }

    #[test]
    fn test_block_boundary_is_exclusive() {
        let until = Utc::now() + Duration::minutes(5);
        let rec = record(Some(until));

        assert!(rec.is_blocked_at(until - Duration::seconds(1)));
        assert!(!rec.is_blocked_at(until));
        assert!(!record(None).is_blocked_at(until));
    }
}
