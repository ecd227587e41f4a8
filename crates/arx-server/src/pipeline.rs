//! Transport-agnostic pipeline pieces: credential resolution, rate
//! limiting, and the error-to-status mapping shared by both shells.

use std::num::NonZeroU32;
use std::sync::atomic::Ordering;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use governor::{DefaultKeyedRateLimiter, Quota};
use sha2::{Digest, Sha256};

use arx_config::RateLimitConfig;
use arx_store::NewAuditEvent;
use arx_types::{ArxError, AuditKind, ErrorKind, Principal, RequestContext};

use crate::messages;
use crate::SharedState;

/// Default per-request deadline when the client sets none.
const DEFAULT_DEADLINE_SECS: i64 = 30;

/// Per-principal token buckets. Disabled limiters always admit.
pub struct RateLimiter {
    enabled: bool,
    limiter: DefaultKeyedRateLimiter<i64>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let per_second = NonZeroU32::new(config.requests_per_second.max(1))
            .unwrap_or(NonZeroU32::new(50).unwrap());
        let burst =
            NonZeroU32::new(config.burst.max(1)).unwrap_or(NonZeroU32::new(100).unwrap());
        Self {
            enabled: config.enabled,
            limiter: DefaultKeyedRateLimiter::keyed(
                Quota::per_second(per_second).allow_burst(burst),
            ),
        }
    }

    pub fn check(&self, key: i64) -> Result<(), ArxError> {
        if !self.enabled {
            return Ok(());
        }
        self.limiter
            .check_key(&key)
            .map_err(|_| ArxError::resource_exhausted("rate limit exceeded"))
    }
}

/// Status-code mapping (authoritative table in the API docs).
pub fn http_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Expired => StatusCode::GONE,
        ErrorKind::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::CryptoUnavailable
        | ErrorKind::CryptoKeyMissing
        | ErrorKind::CryptoIntegrity
        | ErrorKind::Cancelled
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// REST-side error wrapper. Resolves the human-readable message at the
/// edge; nothing beyond the kind and field violations crosses out.
pub struct ApiError(pub ArxError);

impl From<ArxError> for ApiError {
    fn from(e: ArxError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        if kind == ErrorKind::Internal {
            // Full detail stays in the server log.
            tracing::error!(error = %self.0, "request failed");
        }
        let status = http_status(kind);
        let mut body = serde_json::json!({
            "error": kind.code(),
            "message": messages::resolve(kind),
            "code": status.as_u16(),
            "timestamp": Utc::now(),
        });
        let violations = self.0.field_violations();
        if !violations.is_empty() {
            body["details"] = serde_json::json!(violations);
        }
        (status, Json(body)).into_response()
    }
}

/// Success envelope.
pub fn envelope<T: serde::Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "data": data,
        "timestamp": Utc::now(),
    }))
}

pub fn envelope_message<T: serde::Serialize>(data: T, message: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "data": data,
        "message": message,
        "timestamp": Utc::now(),
    }))
}

fn bearer_token(request: &Request) -> Option<String> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(|t| t.trim().to_string())
}

pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Authentication + rate-limit stage for the protected REST routes.
/// Resolves the bearer token to a principal exactly once and stores the
/// resulting [`RequestContext`] in request extensions.
pub async fn authenticate(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let anon = RequestContext::anonymous();
    let token = match bearer_token(&request) {
        Some(token) if !token.is_empty() => token,
        _ => {
            let _ = state.services.store.log_event(
                NewAuditEvent::new(AuditKind::AuthFailed)
                    .details(serde_json::json!({ "reason": "missing bearer token" })),
            );
            return ApiError(ArxError::unauthenticated("missing bearer token")).into_response();
        }
    };

    let user = match state
        .services
        .store
        .find_user_by_token_digest(&anon, &token_digest(&token))
    {
        Ok(Some(user)) => user,
        Ok(None) => {
            let _ = state.services.store.log_event(
                NewAuditEvent::new(AuditKind::AuthFailed)
                    .details(serde_json::json!({ "reason": "unknown or expired token" })),
            );
            return ApiError(ArxError::unauthenticated("invalid token")).into_response();
        }
        Err(e) => return ApiError(e).into_response(),
    };

    if let Err(e) = state.http_limiter.check(user.id) {
        return ApiError(e).into_response();
    }

    let ctx = RequestContext::authenticated(Principal::new(user.id, user.username))
        .with_deadline(Utc::now() + Duration::seconds(DEFAULT_DEADLINE_SECS));
    request.extensions_mut().insert(ctx);

    next.run(request).await
}

/// API responses are never cacheable; only static assets carry cache
/// headers.
pub async fn no_store(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_table() {
        assert_eq!(http_status(ErrorKind::InvalidArgument), StatusCode::BAD_REQUEST);
        assert_eq!(http_status(ErrorKind::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(http_status(ErrorKind::PermissionDenied), StatusCode::FORBIDDEN);
        assert_eq!(http_status(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(http_status(ErrorKind::AlreadyExists), StatusCode::CONFLICT);
        assert_eq!(http_status(ErrorKind::Expired), StatusCode::GONE);
        assert_eq!(
            http_status(ErrorKind::ResourceExhausted),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            http_status(ErrorKind::CryptoIntegrity),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn digest_is_stable_and_hex() {
        let digest = token_digest("example-token");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, token_digest("example-token"));
        assert_ne!(digest, token_digest("other-token"));
    }

    #[test]
    fn disabled_limiter_always_admits() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            enabled: false,
            requests_per_second: 1,
            burst: 1,
        });
        for _ in 0..100 {
            assert!(limiter.check(7).is_ok());
        }
    }

    #[test]
    fn limiter_trips_after_burst() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            enabled: true,
            requests_per_second: 1,
            burst: 2,
        });
        assert!(limiter.check(7).is_ok());
        assert!(limiter.check(7).is_ok());
        assert!(limiter.check(7).is_err());
        // Other principals have their own bucket.
        assert!(limiter.check(8).is_ok());
    }
}
