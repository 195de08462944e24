//! Core admission limiter.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::block;
use super::gate::{AccessGate, BypassReason, GateVerdict};
use super::key::TrackingKey;
use super::limits::{EffectiveLimits, LimitOverrides};
use super::recorder::{RecordOutcome, Recorder, RequestMetadata};
use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::error::Result;
use crate::store::RecordStore;

/// A request to be admitted or refused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionRequest {
    /// Client IP as resolved by the caller
    pub client_ip: String,
    /// URL of the protected request, stored for observation only
    pub request_url: String,
    /// Method of the protected request
    pub request_method: Option<String>,
    /// Only count requests with this method; others are admitted untouched
    pub expected_method: Option<String>,
    /// Resource and user field values
    pub data: BTreeMap<String, String>,
    /// Call-scoped limit overrides
    pub overrides: LimitOverrides,
}

impl AdmissionRequest {
    pub fn new(client_ip: impl Into<String>) -> Self {
        Self {
            client_ip: client_ip.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(field.into(), value.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.request_url = url.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.request_method = Some(method.into());
        self
    }

    pub fn with_expected_method(mut self, method: impl Into<String>) -> Self {
        self.expected_method = Some(method.into());
        self
    }

    pub fn with_overrides(mut self, overrides: LimitOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// The admission decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Counted and admitted
    Allowed,
    /// Admitted without counting
    Bypassed(BypassReason),
    /// Client IP is blacklisted
    Blacklisted,
    /// The key was blocked by an earlier request
    AlreadyBlocked { until: DateTime<Utc> },
    /// This request pushed the key over its limit
    BlockedOnThisRequest { until: DateTime<Utc> },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed | Decision::Bypassed(_))
    }

    /// End of the block behind a refusal, if any.
    pub fn blocked_until(&self) -> Option<DateTime<Utc>> {
        match self {
            Decision::AlreadyBlocked { until } | Decision::BlockedOnThisRequest { until } => Some(*until),
            _ => None,
        }
    }
}

/// The admission limiter.
///
/// This struct is thread-safe and can be shared across multiple tasks. Its
/// configuration is fixed at construction; per-call overrides only ever
/// produce a call-local [`EffectiveLimits`].
pub struct RateLimiter<S: RecordStore> {
    config: LimiterConfig,
    gate: AccessGate,
    base_limits: EffectiveLimits,
    store: Arc<S>,
    recorder: Recorder<S>,
    clock: Arc<dyn Clock>,
}

impl<S: RecordStore> RateLimiter<S> {
    /// Create a limiter on the system clock.
    ///
    /// Fails when `config` does not validate.
    pub fn new(config: LimiterConfig, store: Arc<S>) -> Result<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Create a limiter on the given clock.
    pub fn with_clock(config: LimiterConfig, store: Arc<S>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            gate: AccessGate::from_config(&config),
            base_limits: config.base_limits(),
            recorder: Recorder::new(store.clone()),
            config,
            store,
            clock,
        })
    }

    /// Decide whether a request is admitted, recording it when counted.
    pub async fn evaluate(&self, request: &AdmissionRequest) -> Result<Decision> {
        match self.gate.evaluate(
            &request.client_ip,
            request.request_method.as_deref(),
            request.expected_method.as_deref(),
        ) {
            GateVerdict::Blacklisted => {
                warn!(client_ip = %request.client_ip, "Blacklisted IP refused");
                return Ok(Decision::Blacklisted);
            }
            GateVerdict::Bypass(reason) => {
                trace!(client_ip = %request.client_ip, reason = ?reason, "Request bypassed counting");
                return Ok(Decision::Bypassed(reason));
            }
            GateVerdict::Proceed => {}
        }

        let key = TrackingKey::build(
            &request.data,
            &self.config.resource_fields,
            &self.config.user_fields,
            &request.client_ip,
        )?;
        let limits = self.base_limits.with_overrides(&request.overrides);
        let now = self.clock.now();
        let stored_key = key.to_string_key();

        trace!(
            key = %stored_key,
            mode = %key.mode(),
            requests = limits.requests,
            "Evaluating request"
        );

        let existing = self.store.find(&stored_key).await?;
        if let Some(until) = block::check_already_blocked(existing.as_ref(), now) {
            debug!(key = %stored_key, until = %until, "Key already blocked");
            return Ok(Decision::AlreadyBlocked { until });
        }

        let metadata = RequestMetadata {
            ip_address: request.client_ip.clone(),
            request_url: request.request_url.clone(),
        };

        let decision = match self.recorder.record(&key, &metadata, limits, now).await? {
            RecordOutcome::AlreadyBlocked(until) => {
                debug!(key = %stored_key, until = %until, "Key blocked by a concurrent request");
                Decision::AlreadyBlocked { until }
            }
            RecordOutcome::Recorded(result) => match result.blocked_until {
                Some(until) if result.blocked_on_this_request => {
                    info!(
                        key = %stored_key,
                        mode = %key.mode(),
                        hits = result.window_hits,
                        until = %until,
                        "Block issued"
                    );
                    Decision::BlockedOnThisRequest { until }
                }
                _ => Decision::Allowed,
            },
        };

        Ok(decision)
    }

    /// The configuration this limiter was built from.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// The limits in effect when no override is given.
    pub fn base_limits(&self) -> EffectiveLimits {
        self.base_limits
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
