//! HTTP artifacts for rate limit decisions.
//!
//! Allowed requests get informational headers; rejected requests get a
//! complete `429 Too Many Requests` response with a JSON body and
//! `Retry-After`.

use http::header::{CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use serde_json::json;
use tracing::debug;

use crate::ratelimit::{get_identifier, LimitType, RateLimitResult, RateLimiter};

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const RATE_LIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");

/// Window advertised in the policy header.
const POLICY_WINDOW_SECS: u64 = 60;

/// Headers describing the caller's quota after this decision.
pub fn rate_limit_headers(result: &RateLimitResult) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(result.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(result.remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(result.reset));

    let policy = format!("{};w={}", result.limit, POLICY_WINDOW_SECS);
    if let Ok(policy) = HeaderValue::from_str(&policy) {
        headers.insert(RATE_LIMIT_POLICY, policy);
    }

    headers
}

/// The `429` response for a rejected request.
pub fn too_many_requests(result: &RateLimitResult, now_millis: u64) -> Response<String> {
    let retry_after = result.retry_after_secs(now_millis);
    let body = json!({
        "error": "Too many requests",
        "retryAfter": retry_after,
    });

    let mut response = Response::new(body.to_string());
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;

    let headers = response.headers_mut();
    headers.extend(rate_limit_headers(result));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));

    response
}

/// Check a request against `limit_type`.
///
/// Returns the headers to attach when the request may proceed, or the
/// finished `429` response when it may not.
pub async fn enforce(
    limiter: &RateLimiter,
    request_headers: &HeaderMap,
    limit_type: LimitType,
) -> Result<HeaderMap, Response<String>> {
    let identifier = get_identifier(request_headers);
    let result = limiter.check_rate_limit(&identifier, limit_type).await;

    if result.success {
        Ok(rate_limit_headers(&result))
    } else {
        debug!(
            limit_type = %limit_type,
            identifier = %identifier,
            "Rejecting request with 429"
        );
        Err(too_many_requests(&result, limiter.now_millis()))
    }
}
