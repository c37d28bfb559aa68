// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the UI-facing gateway API.

use std::str::FromStr;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use zapflow_core::ZapflowError;
use zapflow_core::types::{Channel, ChannelKind, ConnectionState, ConversationStatus, LeadSource};
use zapflow_storage::queries::channels;

use crate::server::GatewayState;

/// Error response body, shared by API and webhook handlers.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Map a domain error onto an HTTP response.
pub(crate) fn error_response(err: ZapflowError) -> Response {
    let status = match &err {
        ZapflowError::NotFound { .. } => StatusCode::NOT_FOUND,
        ZapflowError::Conflict(_) => StatusCode::CONFLICT,
        ZapflowError::Provider { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
            details: None,
        }),
    )
        .into_response()
}

pub(crate) fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.into(),
            details: None,
        }),
    )
        .into_response()
}

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

#[derive(Debug, Deserialize)]
pub struct ConversationsQuery {
    #[serde(default)]
    pub status: Option<String>,
}

/// GET /v1/conversations?status=pendente|ativo|arquivado
pub async fn list_conversations(
    State(state): State<GatewayState>,
    Query(query): Query<ConversationsQuery>,
) -> Response {
    let status = match query.status.as_deref() {
        None => ConversationStatus::Pendente,
        Some(raw) => match ConversationStatus::from_str(raw) {
            Ok(status) => status,
            Err(_) => return bad_request(format!("unknown conversation status `{raw}`")),
        },
    };
    match state.reconciler.list_conversations(status).await {
        Ok(conversations) => Json(conversations).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /v1/conversations/{id}/messages
pub async fn get_messages(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    match state.reconciler.list_messages(&id).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub user_id: String,
    pub content: String,
}

/// POST /v1/conversations/{id}/messages — send an outbound message.
pub async fn post_message(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Json(body): Json<SendRequest>,
) -> Response {
    if body.content.trim().is_empty() {
        return bad_request("content must not be empty");
    }
    match state
        .reconciler
        .send_message(&id, &body.user_id, &body.content, &state.client)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(e),
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub user_id: String,
    #[serde(default = "default_true")]
    pub create_lead: bool,
}

#[derive(Debug, Serialize)]
pub struct AcceptResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
}

/// POST /v1/conversations/{id}/accept
pub async fn accept_conversation(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Json(body): Json<AcceptRequest>,
) -> Response {
    match state
        .reconciler
        .accept(&id, &body.user_id, body.create_lead)
        .await
    {
        Ok(lead) => Json(AcceptResponse {
            success: true,
            lead_id: lead.map(|l| l.id),
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /v1/conversations/{id}/archive
pub async fn archive_conversation(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    match state.reconciler.archive(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /v1/conversations/{id}/read
pub async fn mark_conversation_read(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    match state.reconciler.mark_read(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PromoteRequest {
    #[serde(default)]
    pub user_id: Option<String>,
}

/// POST /v1/conversations/{id}/promote
pub async fn promote_conversation(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Option<Json<PromoteRequest>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    match state
        .reconciler
        .promote_to_lead(&id, body.user_id.as_deref())
        .await
    {
        Ok(lead) => (StatusCode::CREATED, Json(lead)).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct OrigemRequest {
    pub origem: String,
}

/// POST /v1/conversations/{id}/origem
pub async fn update_origem(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Json(body): Json<OrigemRequest>,
) -> Response {
    let Ok(origem) = LeadSource::from_str(&body.origem) else {
        return bad_request(format!("unknown origem `{}`", body.origem));
    };
    match state.reconciler.update_origem(&id, origem).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChannelsQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

/// GET /v1/channels
pub async fn list_channels(
    State(state): State<GatewayState>,
    Query(query): Query<ChannelsQuery>,
) -> Response {
    match channels::list_channels(&state.db, query.user_id.as_deref()).await {
        Ok(list) => Json(list).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub user_id: String,
    pub channel_type: ChannelKind,
    pub instance_name: String,
}

/// POST /v1/channels
pub async fn create_channel(
    State(state): State<GatewayState>,
    Json(body): Json<CreateChannelRequest>,
) -> Response {
    if body.instance_name.trim().is_empty() {
        return bad_request("instance_name must not be empty");
    }
    let channel = Channel {
        id: Uuid::new_v4().to_string(),
        user_id: body.user_id,
        channel_type: body.channel_type,
        instance_name: body.instance_name,
        is_active: true,
        state: ConnectionState::Disconnected,
        created_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    };
    match channels::create_channel(&state.db, &channel).await {
        Ok(()) => (StatusCode::CREATED, Json(channel)).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /v1/channels/{id}/toggle
pub async fn toggle_channel(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    let channel = match channels::get_channel(&state.db, &id).await {
        Ok(Some(channel)) => channel,
        Ok(None) => {
            return error_response(ZapflowError::NotFound {
                entity: "channel",
                id,
            });
        }
        Err(e) => return error_response(e),
    };
    match channels::set_active(&state.db, &id, !channel.is_active).await {
        Ok(_) => match channels::get_channel(&state.db, &id).await {
            Ok(Some(updated)) => Json(updated).into_response(),
            Ok(None) => StatusCode::NO_CONTENT.into_response(),
            Err(e) => error_response(e),
        },
        Err(e) => error_response(e),
    }
}

/// DELETE /v1/channels/{id} — releases the provider session best-effort.
pub async fn delete_channel(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    match state.lifecycle.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /v1/channels/{id}/connect — start the connection state machine.
pub async fn connect_channel(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    match state.lifecycle.start_connect(&id).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusRequest {
    /// Force `connected` without a provider round-trip (test aid).
    #[serde(default)]
    pub simulate: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub connected: bool,
}

/// POST /v1/channels/{id}/status
pub async fn channel_status(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Option<Json<StatusRequest>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    if body.simulate {
        return match state.lifecycle.simulate_connected(&id).await {
            Ok(()) => Json(StatusResponse { connected: true }).into_response(),
            Err(e) => error_response(e),
        };
    }
    match state.lifecycle.confirm_connected(&id).await {
        Ok(connected) => Json(StatusResponse { connected }).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /v1/channels/{id}/disconnect
pub async fn disconnect_channel(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    match state.lifecycle.disconnect(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /v1/channels/{id}/sync — user-triggered bulk history import.
///
/// Deliberately not on the webhook path: this is the one long-running
/// operation in the gateway.
pub async fn sync_channel(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    let channel = match channels::get_channel(&state.db, &id).await {
        Ok(Some(channel)) => channel,
        Ok(None) => {
            return error_response(ZapflowError::NotFound {
                entity: "channel",
                id,
            });
        }
        Err(e) => return error_response(e),
    };
    match state
        .reconciler
        .sync_history(channel.channel_type, &channel.instance_name, &state.client)
        .await
    {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /v1/provider/instances — raw provider session listing.
///
/// Doubles as an API-key validation probe for the settings screen.
pub async fn list_provider_instances(State(state): State<GatewayState>) -> Response {
    match state.client.fetch_instances().await {
        Ok(instances) => Json(instances).into_response(),
        Err(e) => error_response(e),
    }
}
