//! Caller identity and request metrics middleware.
//!
//! The server sits behind a gateway that authenticates users and forwards
//! the caller as headers:
//!
//! ```text
//! x-user-id: 6f1c2c9e-8a43-4a38-9d6b-1f0e2b7d4c11
//! x-user-role: admin            (optional)
//! ```
//!
//! [`identity_middleware`] turns them into an [`Actor`] in the request
//! extensions, which handlers extract:
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//! use companion_ledger::Actor;
//!
//! async fn protected_handler(Extension(actor): Extension<Actor>) -> String {
//!     format!("Called by {actor}")
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{MatchedPath, Request},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use companion_ledger::Actor;
use std::time::Instant;
use uuid::Uuid;

use super::error::ApiError;
use crate::{logging, metrics};

/// Header carrying the authenticated user's id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the caller's role
pub const USER_ROLE_HEADER: &str = "x-user-role";

fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let role = headers
        .get(USER_ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    if role.is_some_and(|r| r.eq_ignore_ascii_case("admin")) {
        return Ok(Actor::Admin);
    }

    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;
    let user_id = Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::Unauthorized(format!("malformed {USER_ID_HEADER} header")))?;
    Ok(Actor::User(user_id))
}

/// Authentication middleware that injects the caller's [`Actor`].
///
/// # Behavior
///
/// - `x-user-role: admin` → `Actor::Admin`
/// - valid `x-user-id` → `Actor::User(id)`
/// - otherwise `401 Unauthorized`
pub async fn identity_middleware(mut request: Request, next: Next) -> Response {
    match actor_from_headers(request.headers()) {
        Ok(actor) => {
            request.extensions_mut().insert(actor);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Record request counters, durations and a completion log line
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    // Route templates keep the label set bounded.
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    metrics::http_requests_total(&method, &path, status);
    metrics::http_request_duration_ms(&method, &path, elapsed.as_secs_f64() * 1000.0);
    logging::log_api_request(&method, &path, status, elapsed.as_millis() as u64);

    response
}
