//! Client IP resolution.

use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Used when no address can be determined.
pub const UNKNOWN_CLIENT: &str = "UNKNOWN";

/// Forwarding headers, most trusted first.
const FORWARDING_HEADERS: [&str; 5] = [
    "client-ip",
    "x-forwarded-for",
    "x-forwarded",
    "forwarded-for",
    "forwarded",
];

/// Resolve the client IP for a request.
///
/// With `trust_forwarded` set, the first non-empty forwarding header wins
/// (for list-valued headers, the left-most entry). Otherwise, or when no
/// header is present, the socket peer address is used.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> String {
    if trust_forwarded {
        for name in FORWARDING_HEADERS {
            let value = headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());

            if let Some(value) = value {
                return strip_forwarded_syntax(value).to_string();
            }
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Reduce an RFC 7239 element such as `for="1.2.3.4"` to the bare address.
fn strip_forwarded_syntax(value: &str) -> &str {
    let value = value
        .split(';')
        .find_map(|part| {
            let part = part.trim();
            part.get(..4)
                .filter(|prefix| prefix.eq_ignore_ascii_case("for="))
                .map(|_| &part[4..])
        })
        .unwrap_or(value);
    value.trim_matches('"')
}
