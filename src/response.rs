//! Translating decisions into the configured external response shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::error::Result;
use crate::ratelimit::Decision;

const BLACKLISTED_MESSAGE: &str = "IP is blacklisted";
const BLOCKED_MESSAGE: &str = "User/IP blocked";

/// External shape of an admission response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseShape {
    /// Plain key-value mapping
    #[default]
    #[serde(alias = "array")]
    Raw,
    /// Typed [`AdmissionResponse`]
    Object,
    /// Write the response to a sink, then return it as an object
    #[serde(alias = "json")]
    Emit,
}

/// The fields every response shape carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklisted_ip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_blocked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_on_this_request: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_till: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AdmissionResponse {
    fn allowed() -> Self {
        Self {
            success: true,
            blacklisted_ip: None,
            already_blocked: None,
            blocked_on_this_request: None,
            blocked_till: None,
            message: None,
        }
    }

    fn refused(message: &str) -> Self {
        Self {
            success: false,
            message: Some(message.to_string()),
            ..Self::allowed()
        }
    }
}

impl From<&Decision> for AdmissionResponse {
    fn from(decision: &Decision) -> Self {
        match decision {
            Decision::Allowed | Decision::Bypassed(_) => Self::allowed(),
            Decision::Blacklisted => Self {
                blacklisted_ip: Some(true),
                ..Self::refused(BLACKLISTED_MESSAGE)
            },
            Decision::AlreadyBlocked { until } => Self {
                already_blocked: Some(true),
                blocked_till: Some(*until),
                ..Self::refused(BLOCKED_MESSAGE)
            },
            Decision::BlockedOnThisRequest { until } => Self {
                blocked_on_this_request: Some(true),
                blocked_till: Some(*until),
                ..Self::refused(BLOCKED_MESSAGE)
            },
        }
    }
}

/// A decision rendered in one of the external shapes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Rendered {
    Raw(serde_json::Map<String, serde_json::Value>),
    Object(AdmissionResponse),
}

impl ResponseShape {
    /// Render a decision without emitting it anywhere.
    ///
    /// `Emit` renders as an object here; use [`ResponseShape::render_to`] to
    /// emit.
    pub fn render(self, decision: &Decision) -> Result<Rendered> {
        let response = AdmissionResponse::from(decision);
        match self {
            ResponseShape::Raw => match serde_json::to_value(&response)? {
                serde_json::Value::Object(map) => Ok(Rendered::Raw(map)),
                _ => Ok(Rendered::Object(response)),
            },
            ResponseShape::Object | ResponseShape::Emit => Ok(Rendered::Object(response)),
        }
    }

    /// Render a decision, writing it to `sink` as one JSON line first when
    /// the shape is `Emit`.
    pub fn render_to<W: Write>(self, decision: &Decision, sink: &mut W) -> Result<Rendered> {
        let rendered = self.render(decision)?;
        if self == ResponseShape::Emit {
            serde_json::to_writer(&mut *sink, &rendered)?;
            sink.write_all(b"\n")?;
            sink.flush()?;
        }
        Ok(rendered)
    }
}
