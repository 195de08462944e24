//! Tracking key derivation.

use std::collections::BTreeMap;

use crate::error::{GatehouseError, Result};

/// How a key scopes its requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingMode {
    /// Scoped by user field values, across every IP
    ByUser,
    /// Scoped by the client IP
    ByIp,
}

impl std::fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackingMode::ByUser => write!(f, "user"),
            TrackingMode::ByIp => write!(f, "ip"),
        }
    }
}

/// The identity half of a tracking key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackingScope {
    /// Truthy user field values
    User(BTreeMap<String, String>),
    /// Client IP
    Ip(String),
}

/// A key that groups requests for counting and blocking.
///
/// The key is composed of the supplied resource fields and either the user
/// fields or the client IP, serialized in a consistent order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackingKey {
    /// Declared resource fields present in the request
    pub resource: BTreeMap<String, String>,
    /// User or IP scope
    pub scope: TrackingScope,
}

impl TrackingKey {
    /// Derive the key for a request.
    ///
    /// Fails with [`GatehouseError::MissingField`] when a resource field
    /// declared as required is absent from `data`.
    pub fn build(
        data: &BTreeMap<String, String>,
        resource_fields: &BTreeMap<String, bool>,
        user_fields: &BTreeMap<String, bool>,
        client_ip: &str,
    ) -> Result<Self> {
        let mut resource = BTreeMap::new();
        for (field, required) in resource_fields {
            match data.get(field) {
                Some(value) => {
                    resource.insert(field.clone(), value.clone());
                }
                None if *required => {
                    return Err(GatehouseError::MissingField {
                        field: field.clone(),
                    });
                }
                None => {}
            }
        }

        let users: BTreeMap<String, String> = user_fields
            .iter()
            .filter(|(_, enabled)| **enabled)
            .filter_map(|(field, _)| {
                data.get(field)
                    .filter(|value| is_truthy(value))
                    .map(|value| (field.clone(), value.clone()))
            })
            .collect();

        let scope = if users.is_empty() {
            TrackingScope::Ip(client_ip.to_string())
        } else {
            TrackingScope::User(users)
        };

        Ok(Self { resource, scope })
    }

    pub fn mode(&self) -> TrackingMode {
        match self.scope {
            TrackingScope::User(_) => TrackingMode::ByUser,
            TrackingScope::Ip(_) => TrackingMode::ByIp,
        }
    }

    /// All field values the key was derived from, for persistence.
    pub fn fields(&self) -> BTreeMap<String, String> {
        let mut fields = self.resource.clone();
        if let TrackingScope::User(users) = &self.scope {
            fields.extend(users.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        fields
    }

    /// Convert the key to its stored string representation.
    pub fn to_string_key(&self) -> String {
        let resource = join_pairs(&self.resource);
        match &self.scope {
            TrackingScope::User(users) => format!("{}|user:{}", resource, join_pairs(users)),
            TrackingScope::Ip(ip) => format!("{}|ip:{}", resource, escape(ip)),
        }
    }
}

impl std::fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

/// Empty, `"0"` and `"false"` are falsy.
fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

fn join_pairs(pairs: &BTreeMap<String, String>) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", escape(k), escape(v)))
        .collect::<Vec<_>>()
        .join(",")
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | ',' | '=' | '|' | ':') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
