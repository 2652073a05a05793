use axum::http::Response;
use stas_core::error::{ApiError, codes};
use tower_governor::{
    GovernorError, GovernorLayer, governor::GovernorConfigBuilder,
    key_extractor::SmartIpKeyExtractor,
};

type RateLimitLayer =
    GovernorLayer<SmartIpKeyExtractor, governor::middleware::NoOpMiddleware, axum::body::Body>;

fn layer(replenish_ms: u64, burst: u32, name: &str) -> RateLimitLayer {
    GovernorLayer::new(
        GovernorConfigBuilder::default()
            .per_millisecond(replenish_ms)
            .burst_size(burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap_or_else(|| panic!("invalid governor config for {name}")),
    )
    .error_handler(json_error_handler)
}

/// Tool calls: 60 requests/minute per IP, bursts of 20.
pub fn tools_layer() -> RateLimitLayer {
    layer(1000, 20, "tools")
}

/// Resource reads and the JSON-RPC endpoint: 120 requests/minute per IP, bursts of 30.
pub fn resources_layer() -> RateLimitLayer {
    layer(500, 30, "resources")
}

/// Link flow: 10 requests/minute per IP.
pub fn link_layer() -> RateLimitLayer {
    layer(6000, 10, "link")
}

/// JSON error body in the `ApiError` shape, with `Retry-After` when known.
fn json_error_handler(err: GovernorError) -> Response<axum::body::Body> {
    let (status, retry_after, message) = match err {
        GovernorError::TooManyRequests { wait_time, .. } => (
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            Some(wait_time),
            format!("Too many requests. Retry after {wait_time} seconds."),
        ),
        GovernorError::UnableToExtractKey => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            None,
            "Unable to determine client identity for rate limiting".to_string(),
        ),
        GovernorError::Other { code, msg, .. } => (code, None, msg.unwrap_or_default()),
    };

    let body = ApiError::new(codes::RATE_LIMITED, message, super::request_id::current());
    let mut response = axum::response::IntoResponse::into_response((status, axum::Json(body)));
    if let Some(wait) = retry_after {
        response.headers_mut().insert(
            "retry-after",
            axum::http::HeaderValue::from(wait),
        );
    }
    response
}
