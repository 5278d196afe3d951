//! HTTP router and server loop

use axum::http::{header, HeaderValue, Method, Request};
use axum::{routing::get, Router};
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::{health_check, health_check_simple, shutdown_signal};
use crate::core::config::ServerConfig;
use crate::core::shared::state::AppState;

pub fn create_cors_layer(config: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT]);

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(origins)
    }
}

/// Every route of the service, with state and layers applied.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .merge(crate::auth::configure_auth_routes())
        .merge(crate::tenants::configure_tenants_routes())
        .merge(crate::users::configure_users_routes())
        .merge(crate::settings::configure_settings_routes())
        .merge(crate::queues::configure_queues_routes())
        .merge(crate::fast_replies::configure_fast_replies_routes())
        .merge(crate::contacts::configure_contacts_routes())
        .merge(crate::whatsapp::configure_whatsapp_routes())
        .merge(crate::whatsapp::configure_webhook_routes())
        .merge(crate::tickets::configure_tickets_routes())
        .merge(crate::messages::configure_messages_routes())
        .merge(crate::chat_flow::configure_chat_flow_routes())
        .merge(crate::campaigns::configure_campaigns_routes())
        .merge(crate::api_config::configure_api_config_routes())
        .merge(crate::dashboards::configure_dashboards_routes())
        .merge(crate::realtime::configure_realtime_routes());

    let cors = create_cors_layer(&state.config.server);

    Router::new()
        .route("/health", get(health_check_simple))
        .route("/api/health", get(health_check))
        .merge(api_router)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
                tracing::info_span!("http", method = %req.method(), uri = %req.uri())
            }),
        )
        .with_state(state)
}

pub async fn run_axum_server(state: Arc<AppState>, addr: SocketAddr) -> std::io::Result<()> {
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {addr}: {e} - is another instance running?");
            return Err(e);
        }
    };
    info!("HTTP server listening on {addr}");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(std::io::Error::other)
}
