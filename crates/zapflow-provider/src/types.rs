// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire types for the provider's webhook events and history payloads.
//!
//! Everything is optional-with-defaults: the provider's payloads vary by
//! event kind and media type, and a missing field must not fail the whole
//! request.

use serde::{Deserialize, Serialize};

/// Event kind carried by inbound message webhooks.
pub const EVENT_MESSAGES_UPSERT: &str = "messages.upsert";
/// Event kind carried by connection state-change webhooks.
pub const EVENT_CONNECTION_UPDATE: &str = "connection.update";

/// Suffix marking a group conversation in a remote jid.
pub const GROUP_JID_SUFFIX: &str = "@g.us";

/// Identity of a provider message: remote contact jid, direction, provider id.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageKey {
    pub remote_jid: String,
    pub from_me: bool,
    pub id: Option<String>,
}

/// Timestamp as the provider sends it: epoch seconds or a string.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TimestampValue {
    Seconds(i64),
    Text(String),
}

/// The message-content object, shaped by media kind.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageContent {
    pub conversation: Option<String>,
    pub extended_text_message: Option<ExtendedTextMessage>,
    pub image_message: Option<ImageMessage>,
    pub audio_message: Option<AudioMessage>,
    pub document_message: Option<DocumentMessage>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtendedTextMessage {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageMessage {
    pub caption: Option<String>,
    pub mimetype: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioMessage {
    pub mimetype: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentMessage {
    pub file_name: Option<String>,
    pub mimetype: Option<String>,
}

/// One provider message, as delivered by the webhook's `data` object and by
/// the history endpoint's entries.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderMessage {
    pub key: MessageKey,
    pub push_name: Option<String>,
    pub message: Option<MessageContent>,
    pub message_type: Option<String>,
    pub message_timestamp: Option<TimestampValue>,
}

/// One chat entry from the provider's chat listing.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderChat {
    pub id: Option<String>,
    pub remote_jid: Option<String>,
    pub name: Option<String>,
    pub push_name: Option<String>,
    pub contact: Option<ChatContact>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatContact {
    pub name: Option<String>,
}

impl ProviderChat {
    /// The chat's remote jid, from whichever field the provider filled in.
    pub fn jid(&self) -> Option<&str> {
        self.id.as_deref().or(self.remote_jid.as_deref())
    }

    /// Display name, trying `name`, `pushName`, then the nested contact name.
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.push_name.as_deref())
            .or_else(|| self.contact.as_ref().and_then(|c| c.name.as_deref()))
    }
}
