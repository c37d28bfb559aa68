// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook ingress handlers.
//!
//! Safe to invoke concurrently and repeatedly for the same logical event:
//! all idempotency lives in the reconciler and the store's constraints. The
//! handlers themselves do only fast work (one lookup plus one or two writes);
//! bulk sync is a separate user-triggered API call.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use zapflow_core::types::{ChannelKind, Lead, LeadSource};
use zapflow_inbox::normalizer::{self, Outcome, SkipReason};
use zapflow_inbox::NormalizedMessage;
use zapflow_provider::types::{EVENT_CONNECTION_UPDATE, ProviderMessage};
use zapflow_storage::queries::leads;

use crate::handlers::{ErrorBody, bad_request, error_response};
use crate::server::GatewayState;

/// Success envelope answered for processed and ignored events alike.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
}

fn ok_message(message: &str) -> Response {
    Json(WebhookResponse {
        success: true,
        message: message.to_string(),
        conversation_id: None,
        lead_id: None,
    })
    .into_response()
}

fn unparseable(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: "invalid webhook payload".to_string(),
            details: Some(rejection.to_string()),
        }),
    )
        .into_response()
}

fn skip_message(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::NotAMessage | SkipReason::MissingContact => "Event ignored",
        SkipReason::OutgoingEcho => "Outgoing message ignored",
        SkipReason::GroupChat => "Group message ignored",
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// POST /webhooks/provider — asynchronous provider callbacks.
///
/// Answers 200 for everything it deliberately ignores (non-message events,
/// outbound echoes, groups) so the provider does not retry them; errors only
/// on structurally unparseable bodies or persistence failure.
pub async fn provider_webhook(
    State(state): State<GatewayState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return unparseable(rejection),
    };

    let event = payload.get("event").and_then(Value::as_str).unwrap_or_default();
    let instance = payload
        .get("instance")
        .and_then(Value::as_str)
        .unwrap_or_default();
    debug!(event, instance, "provider webhook received");

    if event == EVENT_CONNECTION_UPDATE {
        let remote_state = payload
            .pointer("/data/state")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return match state
            .lifecycle
            .apply_connection_event(instance, remote_state)
            .await
        {
            Ok(()) => ok_message("Connection update processed"),
            Err(e) => error_response(e),
        };
    }

    let data = payload.get("data").cloned().unwrap_or(Value::Null);
    let data: ProviderMessage = match serde_json::from_value(data) {
        Ok(data) => data,
        Err(e) => {
            // A per-message shape problem must not fail the request.
            warn!(event, instance, error = %e, "unparseable event data, ignoring");
            return ok_message("Event ignored");
        }
    };

    match normalizer::normalize_event(event, &data, &now_rfc3339()) {
        Outcome::Skip(reason) => {
            debug!(event, instance, ?reason, "event skipped");
            ok_message(skip_message(reason))
        }
        Outcome::Message(normalized) => {
            match state.reconciler.ingest(ChannelKind::Whatsapp, &normalized).await {
                Ok(conversation_id) => Json(WebhookResponse {
                    success: true,
                    message: "Message received and processed".to_string(),
                    conversation_id: Some(conversation_id),
                    lead_id: None,
                })
                .into_response(),
                Err(e) => error_response(e),
            }
        }
    }
}

/// Generic automation webhook payload (e.g. n8n flows pushing into the inbox).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InboxWebhookPayload {
    pub channel_type: Option<String>,
    pub external_contact_id: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub message: Option<String>,
    pub origem: Option<String>,
    pub create_lead: bool,
    pub lead_data: Option<LeadData>,
}

/// Lead payload for the paid-traffic lead-creation variant.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LeadData {
    pub nome: Option<String>,
    pub empresa: Option<String>,
    pub email: Option<String>,
    pub telefone: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
}

/// POST /webhooks/inbox — alternate integration path for automation tooling.
pub async fn inbox_webhook(
    State(state): State<GatewayState>,
    payload: Result<Json<InboxWebhookPayload>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return unparseable(rejection),
    };

    let origem = match payload.origem.as_deref() {
        None => None,
        Some(raw) => match raw.parse::<LeadSource>() {
            Ok(origem) => Some(origem),
            Err(_) => return bad_request(format!("unknown origem `{raw}`")),
        },
    };

    // Lead-creation variant: no conversation is touched.
    if payload.create_lead {
        let Some(lead_data) = payload.lead_data else {
            return bad_request("create_lead requires lead_data");
        };
        let Some(nome) = lead_data.nome.filter(|n| !n.trim().is_empty()) else {
            return bad_request("lead_data.nome is required");
        };
        let lead = Lead {
            id: Uuid::new_v4().to_string(),
            nome,
            empresa: lead_data.empresa,
            email: lead_data.email,
            telefone: lead_data.telefone.or(payload.contact_phone),
            origem: origem.or(Some(LeadSource::TrafegoPago)),
            status: "novo".to_string(),
            responsavel_id: None,
            criado_via: None,
            utm_source: lead_data.utm_source,
            utm_medium: lead_data.utm_medium,
            utm_campaign: lead_data.utm_campaign,
            utm_content: lead_data.utm_content,
            created_at: now_rfc3339(),
        };
        return match leads::insert_lead(&state.db, &lead).await {
            Ok(()) => Json(WebhookResponse {
                success: true,
                message: "Lead created successfully".to_string(),
                conversation_id: None,
                lead_id: Some(lead.id),
            })
            .into_response(),
            Err(e) => error_response(e),
        };
    }

    let (Some(channel_type), Some(external_contact_id)) = (
        payload.channel_type.as_deref(),
        payload
            .external_contact_id
            .as_deref()
            .filter(|id| !id.trim().is_empty()),
    ) else {
        return bad_request("Missing required fields: channel_type and external_contact_id");
    };
    let Ok(channel_kind) = channel_type.parse::<ChannelKind>() else {
        return bad_request(format!("unknown channel_type `{channel_type}`"));
    };
    let Some(message) = payload.message.filter(|m| !m.trim().is_empty()) else {
        return bad_request("message is required");
    };

    let now = now_rfc3339();
    let normalized = NormalizedMessage {
        external_contact_id: external_contact_id.to_string(),
        contact_name: payload
            .contact_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| external_contact_id.to_string()),
        contact_phone: payload.contact_phone,
        content: message,
        media_kind: None,
        provider_message_id: None,
        from_me: false,
        timestamp: now,
        unsupported: false,
    };

    match state
        .reconciler
        .ingest_from(channel_kind, &normalized, origem.unwrap_or(LeadSource::Inbound))
        .await
    {
        Ok(conversation_id) => Json(WebhookResponse {
            success: true,
            message: "Message received and processed".to_string(),
            conversation_id: Some(conversation_id),
            lead_id: None,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}
