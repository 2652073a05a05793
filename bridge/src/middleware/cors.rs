use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

const CONNECTOR_ORIGINS: &[&str] = &[
    "https://chatgpt.com",
    "https://chat.openai.com",
    "https://claude.ai",
];

fn allowed_origins(configured: &str) -> Vec<String> {
    let mut origin_values: Vec<String> = configured
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    for connector_origin in CONNECTOR_ORIGINS {
        if !origin_values
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(connector_origin))
        {
            origin_values.push((*connector_origin).to_string());
        }
    }
    origin_values
}

/// Build the CORS layer from `BRIDGE_CORS_ORIGINS` plus the connector origins.
///
/// - Methods: GET, POST, OPTIONS
/// - Headers: Authorization, Content-Type, the connection-id headers
/// - Max age: 3600s
pub fn build_cors_layer(configured: &str) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins(configured)
        .into_iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
            HeaderName::from_static("x-connection-id"),
            HeaderName::from_static("x-conn"),
        ])
        .max_age(std::time::Duration::from_secs(3600))
}
