//! Admission endpoint.

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{header, Extensions, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use super::client_ip::resolve_client_ip;
use crate::error::GatehouseError;
use crate::ratelimit::{AdmissionRequest, LimitOverrides, RateLimiter};
use crate::response::{Rendered, ResponseShape};
use crate::store::RecordStore;

/// Shared state for the HTTP handlers.
pub struct AppState<S: RecordStore> {
    pub limiter: Arc<RateLimiter<S>>,
    pub trust_forwarded_headers: bool,
}

impl<S: RecordStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            trust_forwarded_headers: self.trust_forwarded_headers,
        }
    }
}

/// Body of `POST /v1/admission`.
#[derive(Debug, Default, Deserialize)]
pub struct AdmissionBody {
    /// Resource and user field values; scalars are stringified, nulls dropped
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    #[serde(default)]
    pub request_url: Option<String>,
    #[serde(default)]
    pub request_method: Option<String>,
    #[serde(default, alias = "request_type")]
    pub expected_method: Option<String>,
    #[serde(default)]
    pub overrides: LimitOverrides,
}

impl AdmissionBody {
    fn into_request(self, client_ip: String) -> AdmissionRequest {
        let data = self
            .data
            .into_iter()
            .filter_map(|(field, value)| scalar_to_string(value).map(|v| (field, v)))
            .collect();

        AdmissionRequest {
            client_ip,
            request_url: self.request_url.unwrap_or_default(),
            request_method: self.request_method,
            expected_method: self.expected_method,
            data,
            overrides: self.overrides,
        }
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Evaluate one admission request.
#[instrument(skip(state, headers, extensions, body), fields(client_ip = tracing::field::Empty))]
pub async fn admit<S: RecordStore + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    extensions: Extensions,
    body: Result<Json<AdmissionBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            return ApiError(GatehouseError::InvalidRequest(rejection.body_text())).into_response();
        }
    };

    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = resolve_client_ip(&headers, peer, state.trust_forwarded_headers);
    tracing::Span::current().record("client_ip", client_ip.as_str());

    let request = body.into_request(client_ip);
    let decision = match state.limiter.evaluate(&request).await {
        Ok(decision) => decision,
        Err(e) => return ApiError(e).into_response(),
    };

    debug!(decision = ?decision, "Admission decided");

    let shape = state.limiter.config().response_shape;
    let mut emitted = Vec::new();
    match shape.render_to(&decision, &mut emitted) {
        Ok(_) if shape == ResponseShape::Emit => {
            ([(header::CONTENT_TYPE, "application/json")], emitted).into_response()
        }
        Ok(Rendered::Raw(map)) => Json(map).into_response(),
        Ok(Rendered::Object(response)) => Json(response).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// Liveness probe.
pub async fn health() -> &'static str {
    "ok"
}

/// Maps limiter errors onto HTTP statuses.
pub struct ApiError(pub GatehouseError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatehouseError::MissingField { .. } | GatehouseError::InvalidRequest(_) => {
                warn!(error = %self.0, "Rejected admission request");
                StatusCode::BAD_REQUEST
            }
            GatehouseError::Persistence(_) => {
                error!(error = %self.0, "Admission store unavailable");
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => {
                error!(error = %self.0, "Admission failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = json!({ "success": false, "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}
