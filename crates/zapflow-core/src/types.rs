// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common domain types used across the Zapflow workspace.
//!
//! String forms (storage columns, JSON payloads) are derived via strum and
//! serde so the wire/database spelling lives in exactly one place.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Which messaging integration a channel or conversation belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Whatsapp,
    Instagram,
}

/// Workflow status of an inbox conversation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Pendente,
    Ativo,
    Arquivado,
}

/// Who authored a stored message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Contact,
    Seller,
}

/// Media kind of a non-text message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Document,
}

/// Acquisition source tag for conversations and leads.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    Inbound,
    Outbound,
    Indicacao,
    Pap,
    TrafegoPago,
}

/// Connection state of a channel's provider session.
///
/// Each variant carries only the fields meaningful to that state; the
/// storage layer flattens this to `state` + `pairing_code` +
/// `last_connected_at` columns at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    QrReady { pairing_code: String },
    Connected { since: String },
}

impl ConnectionState {
    /// The storage spelling of this state.
    pub fn status_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::QrReady { .. } => "qr_ready",
            ConnectionState::Connected { .. } => "connected",
        }
    }

    /// Pairing artifact, if this state carries one.
    pub fn pairing_code(&self) -> Option<&str> {
        match self {
            ConnectionState::QrReady { pairing_code } => Some(pairing_code),
            _ => None,
        }
    }

    /// Timestamp of the last successful connection, if known.
    pub fn connected_since(&self) -> Option<&str> {
        match self {
            ConnectionState::Connected { since } => Some(since),
            _ => None,
        }
    }

    /// Rebuild the tagged state from its flattened storage columns.
    ///
    /// Unknown state strings collapse to `Disconnected` rather than erroring:
    /// a channel with an unreadable state is treated as needing a reconnect.
    pub fn from_columns(
        state: &str,
        pairing_code: Option<String>,
        last_connected_at: Option<String>,
    ) -> Self {
        match state {
            "connected" => ConnectionState::Connected {
                since: last_connected_at.unwrap_or_default(),
            },
            "qr_ready" => ConnectionState::QrReady {
                pairing_code: pairing_code.unwrap_or_default(),
            },
            "connecting" => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// One messaging integration instance belonging to one seller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub user_id: String,
    pub channel_type: ChannelKind,
    /// Human label, also used as the provider-side instance identifier.
    pub instance_name: String,
    pub is_active: bool,
    #[serde(flatten)]
    pub state: ConnectionState,
    pub created_at: String,
}

/// One logical thread with one external contact on one channel kind.
///
/// `(channel_type, external_contact_id)` is unique and serves as the
/// reconciliation idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub channel_type: ChannelKind,
    pub external_contact_id: String,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub status: ConversationStatus,
    pub origem: Option<LeadSource>,
    pub lead_id: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub unread_count: i64,
    pub assigned_to: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One unit of conversation content. Immutable and append-only once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_type: SenderRole,
    pub sender_id: Option<String>,
    pub content: String,
    pub media_type: Option<MediaKind>,
    pub media_url: Option<String>,
    /// Stable provider-assigned id when available; the duplicate-suppression key.
    pub provider_message_id: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

/// A CRM lead created from a conversation or an automation webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub nome: String,
    pub empresa: Option<String>,
    pub email: Option<String>,
    pub telefone: Option<String>,
    pub origem: Option<LeadSource>,
    pub status: String,
    pub responsavel_id: Option<String>,
    pub criado_via: Option<ChannelKind>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_content: Option<String>,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn channel_kind_round_trips_through_strings() {
        for kind in [ChannelKind::Whatsapp, ChannelKind::Instagram] {
            let s = kind.to_string();
            assert_eq!(ChannelKind::from_str(&s).unwrap(), kind);
        }
        assert_eq!(ChannelKind::Whatsapp.to_string(), "whatsapp");
    }

    #[test]
    fn lead_source_uses_snake_case() {
        assert_eq!(LeadSource::TrafegoPago.to_string(), "trafego_pago");
        assert_eq!(
            LeadSource::from_str("trafego_pago").unwrap(),
            LeadSource::TrafegoPago
        );
    }

    #[test]
    fn connection_state_flattens_and_rebuilds() {
        let qr = ConnectionState::QrReady {
            pairing_code: "data:image/png;base64,abc".to_string(),
        };
        assert_eq!(qr.status_str(), "qr_ready");
        let rebuilt = ConnectionState::from_columns(
            qr.status_str(),
            qr.pairing_code().map(str::to_string),
            None,
        );
        assert_eq!(rebuilt, qr);

        let connected = ConnectionState::Connected {
            since: "2026-02-01T10:00:00Z".to_string(),
        };
        let rebuilt = ConnectionState::from_columns(
            "connected",
            None,
            Some("2026-02-01T10:00:00Z".to_string()),
        );
        assert_eq!(rebuilt, connected);
    }

    #[test]
    fn unknown_state_string_collapses_to_disconnected() {
        let state = ConnectionState::from_columns("banana", None, None);
        assert_eq!(state, ConnectionState::Disconnected);
    }

    #[test]
    fn connection_state_serializes_as_tagged_blob() {
        let qr = ConnectionState::QrReady {
            pairing_code: "qr-data".to_string(),
        };
        let json = serde_json::to_value(&qr).unwrap();
        assert_eq!(json["status"], "qr_ready");
        assert_eq!(json["pairing_code"], "qr-data");

        let disconnected = serde_json::to_value(ConnectionState::Disconnected).unwrap();
        assert_eq!(disconnected["status"], "disconnected");
    }
}
