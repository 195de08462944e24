//! Static IP lists and method filtering, evaluated before any counting.

use std::collections::HashSet;

use crate::config::LimiterConfig;

/// Why a request skipped counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    /// Client IP is on the whitelist
    Whitelisted,
    /// The request method is not the one this limit applies to
    MethodMismatch,
}

/// Outcome of the access gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    /// Deny without recording
    Blacklisted,
    /// Admit without counting or recording
    Bypass(BypassReason),
    /// Run the full counting pipeline
    Proceed,
}

/// Whitelist/blacklist and method-filter short-circuits.
#[derive(Debug, Clone, Default)]
pub struct AccessGate {
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
}

impl AccessGate {
    pub fn new(whitelist: HashSet<String>, blacklist: HashSet<String>) -> Self {
        Self { whitelist, blacklist }
    }

    pub fn from_config(config: &LimiterConfig) -> Self {
        Self::new(config.whitelist_ips.clone(), config.blacklist_ips.clone())
    }

    /// Decide whether a request short-circuits. The blacklist always wins.
    pub fn evaluate(
        &self,
        client_ip: &str,
        request_method: Option<&str>,
        expected_method: Option<&str>,
    ) -> GateVerdict {
        if self.blacklist.contains(client_ip) {
            return GateVerdict::Blacklisted;
        }

        if let Some(expected) = expected_method {
            let matches = request_method == Some(expected);
            if !matches {
                return GateVerdict::Bypass(BypassReason::MethodMismatch);
            }
        }

        if self.whitelist.contains(client_ip) {
            return GateVerdict::Bypass(BypassReason::Whitelisted);
        }

        GateVerdict::Proceed
    }
}
