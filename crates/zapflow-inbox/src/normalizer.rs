// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pure normalization of provider events into canonical message records.
//!
//! Normalization never fails upward: anything that cannot be turned into a
//! usable inbound message becomes a [`Skip`](Outcome::Skip), so one bad event
//! cannot take down a webhook request or a sync batch.

use chrono::{DateTime, SecondsFormat};
use zapflow_core::types::MediaKind;
use zapflow_provider::types::{
    GROUP_JID_SUFFIX, EVENT_MESSAGES_UPSERT, MessageContent, ProviderMessage, TimestampValue,
};

/// Placeholder content for an image without a caption.
pub const PLACEHOLDER_IMAGE: &str = "[Imagem]";
/// Placeholder content for audio messages.
pub const PLACEHOLDER_AUDIO: &str = "[Áudio]";
/// Placeholder content when no known media shape matched.
pub const PLACEHOLDER_UNSUPPORTED: &str = "[Mensagem não suportada]";

/// Canonical form of one provider message.
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    /// Jid prefix before the `@`; the reconciliation contact key.
    pub external_contact_id: String,
    /// Display name, falling back to the contact id when the provider sent none.
    pub contact_name: String,
    /// Contact phone when known; for provider jids this is the contact id.
    pub contact_phone: Option<String>,
    pub content: String,
    pub media_kind: Option<MediaKind>,
    pub provider_message_id: Option<String>,
    /// True when the owning session itself authored the message.
    pub from_me: bool,
    /// RFC 3339 instant: the provider timestamp when present, else ingestion time.
    pub timestamp: String,
    /// True when content is the unsupported-media placeholder. Bulk sync
    /// drops these; the live path stores them.
    pub unsupported: bool,
}

/// Why an event was skipped rather than normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not a new-message event kind.
    NotAMessage,
    /// Outbound echo of a message this session sent itself.
    OutgoingEcho,
    /// Group conversation.
    GroupChat,
    /// No usable external contact identifier.
    MissingContact,
}

/// Result of normalizing one provider event.
#[derive(Debug, Clone)]
pub enum Outcome {
    Message(NormalizedMessage),
    Skip(SkipReason),
}

/// Normalize a live webhook event.
///
/// Rules, in priority order: non-message event kinds, outbound echoes, and
/// group targets are skipped; everything else yields a canonical record with
/// content extracted by media priority.
pub fn normalize_event(event_kind: &str, data: &ProviderMessage, ingested_at: &str) -> Outcome {
    if event_kind != EVENT_MESSAGES_UPSERT {
        return Outcome::Skip(SkipReason::NotAMessage);
    }
    if data.key.from_me {
        return Outcome::Skip(SkipReason::OutgoingEcho);
    }
    let jid = data.key.remote_jid.as_str();
    if jid.contains(GROUP_JID_SUFFIX) {
        return Outcome::Skip(SkipReason::GroupChat);
    }
    let Some(contact_id) = contact_id_from_jid(jid) else {
        return Outcome::Skip(SkipReason::MissingContact);
    };

    Outcome::Message(build(data, contact_id, ingested_at))
}

/// Normalize one entry of a chat's history for bulk import.
///
/// Unlike the live path, outbound messages are kept (their direction is
/// recorded via `from_me`); group filtering happens at the chat level before
/// this is called.
pub fn normalize_history_message(data: &ProviderMessage, ingested_at: &str) -> NormalizedMessage {
    let contact_id =
        contact_id_from_jid(&data.key.remote_jid).unwrap_or(data.key.remote_jid.as_str());
    build(data, contact_id, ingested_at)
}

fn build(data: &ProviderMessage, contact_id: &str, ingested_at: &str) -> NormalizedMessage {
    let (content, media_kind, unsupported) = extract_content(data.message.as_ref());
    let contact_name = data
        .push_name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or(contact_id)
        .to_string();

    NormalizedMessage {
        external_contact_id: contact_id.to_string(),
        contact_name,
        contact_phone: Some(contact_id.to_string()),
        content,
        media_kind,
        provider_message_id: data.key.id.clone(),
        from_me: data.key.from_me,
        timestamp: timestamp_to_rfc3339(data.message_timestamp.as_ref(), ingested_at),
        unsupported,
    }
}

/// The jid prefix before `@`, or `None` when the jid has no usable prefix.
fn contact_id_from_jid(jid: &str) -> Option<&str> {
    let (prefix, _) = jid.split_once('@')?;
    (!prefix.is_empty()).then_some(prefix)
}

/// Extract content by media priority: plain text, extended text, image
/// caption, audio, document, then the unsupported placeholder.
fn extract_content(content: Option<&MessageContent>) -> (String, Option<MediaKind>, bool) {
    if let Some(msg) = content {
        if let Some(text) = msg.conversation.as_deref().filter(|t| !t.is_empty()) {
            return (text.to_string(), None, false);
        }
        if let Some(text) = msg
            .extended_text_message
            .as_ref()
            .and_then(|e| e.text.as_deref())
            .filter(|t| !t.is_empty())
        {
            return (text.to_string(), None, false);
        }
        if let Some(image) = &msg.image_message {
            let content = image
                .caption
                .as_deref()
                .filter(|c| !c.is_empty())
                .unwrap_or(PLACEHOLDER_IMAGE)
                .to_string();
            return (content, Some(MediaKind::Image), false);
        }
        if msg.audio_message.is_some() {
            return (PLACEHOLDER_AUDIO.to_string(), Some(MediaKind::Audio), false);
        }
        if let Some(document) = &msg.document_message {
            let file_name = document.file_name.as_deref().unwrap_or("arquivo");
            return (
                format!("[Documento: {file_name}]"),
                Some(MediaKind::Document),
                false,
            );
        }
    }
    (PLACEHOLDER_UNSUPPORTED.to_string(), None, true)
}

/// Convert the provider's numeric/string timestamp to RFC 3339, falling back
/// to the ingestion instant.
fn timestamp_to_rfc3339(ts: Option<&TimestampValue>, ingested_at: &str) -> String {
    match ts {
        Some(TimestampValue::Seconds(secs)) => DateTime::from_timestamp(*secs, 0)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| ingested_at.to_string()),
        Some(TimestampValue::Text(text)) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                dt.to_utc().to_rfc3339_opts(SecondsFormat::Secs, true)
            } else if let Ok(secs) = text.parse::<i64>() {
                DateTime::from_timestamp(secs, 0)
                    .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_else(|| ingested_at.to_string())
            } else {
                ingested_at.to_string()
            }
        }
        None => ingested_at.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zapflow_provider::types::{
        AudioMessage, DocumentMessage, ExtendedTextMessage, ImageMessage, MessageKey,
    };

    const NOW: &str = "2026-02-01T12:00:00Z";

    fn contact_message(content: MessageContent) -> ProviderMessage {
        ProviderMessage {
            key: MessageKey {
                remote_jid: "5511999999999@s.whatsapp.net".to_string(),
                from_me: false,
                id: Some("WAMID-1".to_string()),
            },
            push_name: Some("Maria".to_string()),
            message: Some(content),
            message_type: None,
            message_timestamp: Some(TimestampValue::Seconds(1770000000)),
        }
    }

    fn text_content(text: &str) -> MessageContent {
        MessageContent {
            conversation: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn non_message_event_is_skipped() {
        let data = contact_message(text_content("oi"));
        let outcome = normalize_event("connection.update", &data, NOW);
        assert!(matches!(outcome, Outcome::Skip(SkipReason::NotAMessage)));
    }

    #[test]
    fn outgoing_echo_is_skipped() {
        let mut data = contact_message(text_content("oi"));
        data.key.from_me = true;
        let outcome = normalize_event(EVENT_MESSAGES_UPSERT, &data, NOW);
        assert!(matches!(outcome, Outcome::Skip(SkipReason::OutgoingEcho)));
    }

    #[test]
    fn group_target_is_skipped() {
        let mut data = contact_message(text_content("oi"));
        data.key.remote_jid = "12036304@g.us".to_string();
        let outcome = normalize_event(EVENT_MESSAGES_UPSERT, &data, NOW);
        assert!(matches!(outcome, Outcome::Skip(SkipReason::GroupChat)));
    }

    #[test]
    fn jid_without_contact_prefix_is_skipped() {
        let mut data = contact_message(text_content("oi"));
        data.key.remote_jid = "status".to_string();
        assert!(matches!(
            normalize_event(EVENT_MESSAGES_UPSERT, &data, NOW),
            Outcome::Skip(SkipReason::MissingContact)
        ));

        data.key.remote_jid = "@s.whatsapp.net".to_string();
        assert!(matches!(
            normalize_event(EVENT_MESSAGES_UPSERT, &data, NOW),
            Outcome::Skip(SkipReason::MissingContact)
        ));
    }

    #[test]
    fn plain_text_beats_image() {
        let content = MessageContent {
            conversation: Some("texto simples".to_string()),
            image_message: Some(ImageMessage {
                caption: Some("legenda".to_string()),
                mimetype: None,
            }),
            ..Default::default()
        };
        let outcome = normalize_event(EVENT_MESSAGES_UPSERT, &contact_message(content), NOW);
        let Outcome::Message(msg) = outcome else {
            panic!("expected a message");
        };
        assert_eq!(msg.content, "texto simples");
        assert!(msg.media_kind.is_none());
    }

    #[test]
    fn extended_text_is_second_priority() {
        let content = MessageContent {
            extended_text_message: Some(ExtendedTextMessage {
                text: Some("texto rico".to_string()),
            }),
            ..Default::default()
        };
        let Outcome::Message(msg) =
            normalize_event(EVENT_MESSAGES_UPSERT, &contact_message(content), NOW)
        else {
            panic!("expected a message");
        };
        assert_eq!(msg.content, "texto rico");
    }

    #[test]
    fn image_without_caption_gets_placeholder() {
        let content = MessageContent {
            image_message: Some(ImageMessage {
                caption: None,
                mimetype: Some("image/jpeg".to_string()),
            }),
            ..Default::default()
        };
        let Outcome::Message(msg) =
            normalize_event(EVENT_MESSAGES_UPSERT, &contact_message(content), NOW)
        else {
            panic!("expected a message");
        };
        assert_eq!(msg.content, PLACEHOLDER_IMAGE);
        assert_eq!(msg.media_kind, Some(MediaKind::Image));
        assert!(!msg.unsupported);
    }

    #[test]
    fn audio_only_yields_audio_placeholder_and_kind() {
        let content = MessageContent {
            audio_message: Some(AudioMessage {
                mimetype: Some("audio/ogg".to_string()),
            }),
            ..Default::default()
        };
        let Outcome::Message(msg) =
            normalize_event(EVENT_MESSAGES_UPSERT, &contact_message(content), NOW)
        else {
            panic!("expected a message");
        };
        assert_eq!(msg.content, PLACEHOLDER_AUDIO);
        assert_eq!(msg.media_kind, Some(MediaKind::Audio));
    }

    #[test]
    fn document_placeholder_includes_filename() {
        let content = MessageContent {
            document_message: Some(DocumentMessage {
                file_name: Some("proposta.pdf".to_string()),
                mimetype: None,
            }),
            ..Default::default()
        };
        let Outcome::Message(msg) =
            normalize_event(EVENT_MESSAGES_UPSERT, &contact_message(content), NOW)
        else {
            panic!("expected a message");
        };
        assert_eq!(msg.content, "[Documento: proposta.pdf]");
        assert_eq!(msg.media_kind, Some(MediaKind::Document));

        let content = MessageContent {
            document_message: Some(DocumentMessage::default()),
            ..Default::default()
        };
        let Outcome::Message(msg) =
            normalize_event(EVENT_MESSAGES_UPSERT, &contact_message(content), NOW)
        else {
            panic!("expected a message");
        };
        assert_eq!(msg.content, "[Documento: arquivo]");
    }

    #[test]
    fn unknown_shape_is_unsupported_but_not_skipped() {
        let Outcome::Message(msg) = normalize_event(
            EVENT_MESSAGES_UPSERT,
            &contact_message(MessageContent::default()),
            NOW,
        ) else {
            panic!("expected a message");
        };
        assert_eq!(msg.content, PLACEHOLDER_UNSUPPORTED);
        assert!(msg.unsupported);
    }

    #[test]
    fn contact_fields_and_timestamp_are_extracted() {
        let Outcome::Message(msg) = normalize_event(
            EVENT_MESSAGES_UPSERT,
            &contact_message(text_content("oi")),
            NOW,
        ) else {
            panic!("expected a message");
        };
        assert_eq!(msg.external_contact_id, "5511999999999");
        assert_eq!(msg.contact_name, "Maria");
        assert_eq!(msg.provider_message_id.as_deref(), Some("WAMID-1"));
        assert_eq!(msg.timestamp, "2026-02-02T02:40:00Z");
    }

    #[test]
    fn missing_push_name_falls_back_to_contact_id() {
        let mut data = contact_message(text_content("oi"));
        data.push_name = None;
        let Outcome::Message(msg) = normalize_event(EVENT_MESSAGES_UPSERT, &data, NOW) else {
            panic!("expected a message");
        };
        assert_eq!(msg.contact_name, "5511999999999");
    }

    #[test]
    fn missing_timestamp_uses_ingestion_time() {
        let mut data = contact_message(text_content("oi"));
        data.message_timestamp = None;
        let Outcome::Message(msg) = normalize_event(EVENT_MESSAGES_UPSERT, &data, NOW) else {
            panic!("expected a message");
        };
        assert_eq!(msg.timestamp, NOW);
    }

    #[test]
    fn string_timestamps_are_tolerated() {
        let mut data = contact_message(text_content("oi"));
        data.message_timestamp = Some(TimestampValue::Text("1770000000".to_string()));
        let Outcome::Message(msg) = normalize_event(EVENT_MESSAGES_UPSERT, &data, NOW) else {
            panic!("expected a message");
        };
        assert_eq!(msg.timestamp, "2026-02-02T02:40:00Z");

        data.message_timestamp = Some(TimestampValue::Text("not a date".to_string()));
        let Outcome::Message(msg) = normalize_event(EVENT_MESSAGES_UPSERT, &data, NOW) else {
            panic!("expected a message");
        };
        assert_eq!(msg.timestamp, NOW);
    }

    #[test]
    fn history_normalization_keeps_outbound_messages() {
        let mut data = contact_message(text_content("mandei eu"));
        data.key.from_me = true;
        let msg = normalize_history_message(&data, NOW);
        assert!(msg.from_me);
        assert_eq!(msg.content, "mandei eu");
    }
}
