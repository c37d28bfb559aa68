// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state: a public health route,
//! unauthenticated webhook ingress (the provider cannot send credentials),
//! and the bearer-guarded UI-facing API.

use axum::{
    Router,
    middleware as axum_middleware,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;

use zapflow_core::ZapflowError;
use zapflow_inbox::{Reconciler, SessionLifecycle};
use zapflow_provider::EvolutionClient;
use zapflow_storage::Database;

use crate::auth::{AuthConfig, auth_middleware};
use crate::{handlers, webhooks};

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub db: Database,
    pub reconciler: Reconciler,
    pub lifecycle: SessionLifecycle,
    pub client: EvolutionClient,
    pub auth: AuthConfig,
    /// Process start time for uptime reporting.
    pub start_time: std::time::Instant,
}

/// Gateway server configuration (mirrors GatewayConfig from zapflow-config).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
}

/// Build the full gateway router. Exposed separately so tests can serve it
/// on an ephemeral port.
pub fn build_router(state: GatewayState) -> Router {
    let auth_state = state.auth.clone();

    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .with_state(state.clone());

    let webhook_routes = Router::new()
        .route("/webhooks/provider", post(webhooks::provider_webhook))
        .route("/webhooks/inbox", post(webhooks::inbox_webhook))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/v1/conversations", get(handlers::list_conversations))
        .route(
            "/v1/conversations/{id}/messages",
            get(handlers::get_messages).post(handlers::post_message),
        )
        .route("/v1/conversations/{id}/accept", post(handlers::accept_conversation))
        .route("/v1/conversations/{id}/archive", post(handlers::archive_conversation))
        .route("/v1/conversations/{id}/read", post(handlers::mark_conversation_read))
        .route("/v1/conversations/{id}/promote", post(handlers::promote_conversation))
        .route("/v1/conversations/{id}/origem", post(handlers::update_origem))
        .route(
            "/v1/channels",
            get(handlers::list_channels).post(handlers::create_channel),
        )
        .route("/v1/channels/{id}", delete(handlers::delete_channel))
        .route("/v1/channels/{id}/toggle", post(handlers::toggle_channel))
        .route("/v1/channels/{id}/connect", post(handlers::connect_channel))
        .route("/v1/channels/{id}/status", post(handlers::channel_status))
        .route("/v1/channels/{id}/disconnect", post(handlers::disconnect_channel))
        .route("/v1/channels/{id}/sync", post(handlers::sync_channel))
        .route("/v1/provider/instances", get(handlers::list_provider_instances))
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(webhook_routes)
        .merge(api_routes)
        .layer(CorsLayer::permissive())
}

/// Start the gateway HTTP server and serve until shutdown.
pub async fn start_server(config: &ServerConfig, state: GatewayState) -> Result<(), ZapflowError> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ZapflowError::Gateway {
            message: format!("failed to bind gateway to {addr}: {e}"),
            source: Some(Box::new(e)),
        })?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, app)
        .await
        .map_err(|e| ZapflowError::Gateway {
            message: format!("gateway server error: {e}"),
            source: Some(Box::new(e)),
        })?;

    Ok(())
}
