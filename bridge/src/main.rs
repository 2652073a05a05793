use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod channel;
mod config;
mod dispatcher;
mod error;
mod extract;
mod gateway;
mod identity;
mod manifest;
mod middleware;
mod resources;
mod routes;
mod state;

use config::{BridgeConfig, Mode};
use gateway::{Gateway, HttpGateway, StubGateway};
use identity::{IdentityResolver, LinkStore, MemoryLinkStore, PgLinkStore};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "STAS MCP Bridge",
        version = "0.1.0",
        description = "Connector bridge: plan resources and confirm-gated plan tools over HTTP/SSE, backed by the STAS gateway."
    ),
    paths(
        routes::health::health_check,
        routes::sse::open_channel,
        routes::resources::read_resource,
        routes::tools::call_tool,
        routes::link::start_link,
        routes::link::complete_link,
        routes::link::whoami,
        routes::mcp::mcp_manifest,
        routes::mcp::mcp_post,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::link::LinkStatusResponse,
        routes::link::LinkRequest,
        routes::link::WhoamiResponse,
        manifest::Manifest,
        manifest::ManifestEntry,
        stas_core::error::ApiError,
        stas_core::plan::Plan,
        stas_core::plan::Day,
        stas_core::plan::ValidationResult,
        stas_core::plan::PublishRequest,
        stas_core::plan::PublishResponse,
        stas_core::plan::DeleteRequest,
        stas_core::plan::DeleteResponse,
        stas_core::plan::UpdateRequest,
        stas_core::plan::UpdateResponse,
        stas_core::plan::StatusRequest,
        stas_core::plan::StatusResponse,
        stas_core::plan::ListRequest,
        stas_core::plan::ListResponse,
        stas_core::plan::PlanSummary,
        stas_core::plan::NeedConfirmResponse,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

/// `POST /link` takes the operator link secret as a bearer token.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stas_bridge=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = BridgeConfig::parse();
    let mode = config.mode().expect("invalid BRIDGE_BASE");

    let gateway: Arc<dyn Gateway> = match &mode {
        Mode::Bridge { base, token } => Arc::new(
            HttpGateway::new(base.clone(), token.clone(), config.request_timeout())
                .expect("Failed to build gateway client"),
        ),
        Mode::Stub => Arc::new(StubGateway::new()),
    };

    let store: Arc<dyn LinkStore> = match config.database_url() {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await
                .expect("Failed to connect to database");

            sqlx::migrate!("../migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");

            Arc::new(PgLinkStore::new(pool))
        }
        None => Arc::new(MemoryLinkStore::default()),
    };

    let fixed_user_id = config.fixed_user_id(&mode);
    tracing::info!(
        event = "bridge_configured",
        mode = mode.as_str(),
        fixed_identity = fixed_user_id.is_some(),
        durable_links = config.database_url().is_some(),
        "bridge configured"
    );

    let identity = IdentityResolver::new(fixed_user_id, store)
        .with_session_writes(config.allow_session_user);
    let link_secret = config.link_secret();
    if link_secret.is_none() {
        tracing::info!("BRIDGE_LINK_SECRET not set, POST /link is disabled");
    }
    let app_state = state::AppState::new(gateway, identity, mode, config.ping_interval())
        .with_link_secret(link_secret);

    let cors_layer = middleware::cors::build_cors_layer(&config.cors_origins);

    // Per-IP rate limits on tool, resource and link routes
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::sse::router())
        .merge(routes::resources::router().layer(middleware::rate_limit::resources_layer()))
        .merge(routes::tools::router().layer(middleware::rate_limit::tools_layer()))
        .merge(routes::mcp::router().layer(middleware::rate_limit::resources_layer()))
        .merge(routes::link::router().layer(middleware::rate_limit::link_layer()))
        .layer(axum::middleware::from_fn(middleware::security_headers::apply))
        .layer(axum::middleware::from_fn(middleware::request_id::scope))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors_layer),
        )
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("STAS bridge listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listen address");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server error");
}
