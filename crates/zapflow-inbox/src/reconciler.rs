// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation reconciliation: merging inbound provider events and bulk
//! history imports into the conversation/message store without duplication,
//! plus the UI-facing conversation operations built on the same store.

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use zapflow_core::ZapflowError;
use zapflow_core::types::{
    ChannelKind, ConnectionState, Conversation, ConversationStatus, Lead, LeadSource, Message,
    SenderRole,
};
use zapflow_provider::EvolutionClient;
use zapflow_provider::types::{GROUP_JID_SUFFIX, ProviderChat};
use zapflow_storage::Database;
use zapflow_storage::queries::conversations::InboundUpsert;
use zapflow_storage::queries::{channels, conversations, leads, messages};

use crate::normalizer::{NormalizedMessage, normalize_history_message};
use crate::now_rfc3339;

/// Messages fetched per chat during bulk sync.
const HISTORY_LIMIT: u32 = 50;

/// Aggregate result of one bulk sync run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SyncSummary {
    pub total_chats: usize,
    pub synced: usize,
    pub errors: usize,
}

/// Result of sending an outbound message.
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub message_id: String,
    /// False when no connected channel of the right kind was available and
    /// the message was only stored locally.
    pub forwarded: bool,
}

/// The reconciliation engine. Cheap to clone; all clones share one store.
#[derive(Clone)]
pub struct Reconciler {
    db: Database,
}

impl Reconciler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Merge one live inbound message into the store.
    ///
    /// Creates the conversation in `pendente` when the `(channel kind,
    /// contact)` pair is new, otherwise bumps the existing row's denormalized
    /// fields and unread counter; then appends the message. Appending is
    /// idempotent on the provider message id, so at-least-once webhook
    /// delivery cannot duplicate rows.
    ///
    /// Returns the conversation id.
    pub async fn ingest(
        &self,
        channel_kind: ChannelKind,
        normalized: &NormalizedMessage,
    ) -> Result<String, ZapflowError> {
        self.ingest_from(channel_kind, normalized, LeadSource::Inbound)
            .await
    }

    /// [`ingest`](Self::ingest) with an explicit lead-source tag, for
    /// ingress paths (automation webhooks) that carry their own origem.
    pub async fn ingest_from(
        &self,
        channel_kind: ChannelKind,
        normalized: &NormalizedMessage,
        origem: LeadSource,
    ) -> Result<String, ZapflowError> {
        let conversation_id = conversations::upsert_inbound(
            &self.db,
            InboundUpsert {
                id_candidate: Uuid::new_v4().to_string(),
                channel_type: channel_kind,
                external_contact_id: normalized.external_contact_id.clone(),
                contact_name: Some(normalized.contact_name.clone()),
                contact_phone: normalized
                    .contact_phone
                    .clone()
                    .or_else(|| Some(normalized.external_contact_id.clone())),
                origem,
                last_message: normalized.content.clone(),
                last_message_at: normalized.timestamp.clone(),
                now: now_rfc3339(),
            },
        )
        .await?;

        let inserted = messages::insert_message(
            &self.db,
            &Message {
                id: Uuid::new_v4().to_string(),
                conversation_id: conversation_id.clone(),
                sender_type: SenderRole::Contact,
                sender_id: None,
                content: normalized.content.clone(),
                media_type: normalized.media_kind,
                media_url: None,
                provider_message_id: normalized.provider_message_id.clone(),
                is_read: false,
                created_at: normalized.timestamp.clone(),
            },
        )
        .await?;

        if !inserted {
            debug!(
                conversation_id,
                provider_message_id = ?normalized.provider_message_id,
                "duplicate provider message suppressed"
            );
        }

        Ok(conversation_id)
    }

    /// Import a channel's historical chats from the provider.
    ///
    /// Group chats and entries without a usable contact id are skipped; a
    /// conversation that already holds any message is skipped entirely (the
    /// coarse idempotence boundary that keeps repeated syncs from flooding
    /// the store). A failure on one chat is counted and the loop continues.
    pub async fn sync_history(
        &self,
        channel_kind: ChannelKind,
        instance: &str,
        client: &EvolutionClient,
    ) -> Result<SyncSummary, ZapflowError> {
        let chats = client.find_chats(instance).await?;
        let mut summary = SyncSummary {
            total_chats: chats.len(),
            ..Default::default()
        };
        info!(instance, total_chats = summary.total_chats, "starting bulk sync");

        for chat in &chats {
            let Some(jid) = chat.jid() else { continue };
            if jid.contains(GROUP_JID_SUFFIX) || !jid.contains('@') {
                continue;
            }
            match self.import_chat(channel_kind, instance, client, chat, jid).await {
                Ok(true) => summary.synced += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(instance, jid, error = %e, "chat sync failed");
                    summary.errors += 1;
                }
            }
        }

        info!(
            instance,
            synced = summary.synced,
            errors = summary.errors,
            "bulk sync complete"
        );
        Ok(summary)
    }

    /// Import one chat's backlog. Returns whether the chat counts as synced.
    async fn import_chat(
        &self,
        channel_kind: ChannelKind,
        instance: &str,
        client: &EvolutionClient,
        chat: &ProviderChat,
        jid: &str,
    ) -> Result<bool, ZapflowError> {
        let Some(contact_id) = jid.split('@').next().filter(|p| !p.is_empty()) else {
            return Ok(false);
        };
        let contact_name = chat.display_name().unwrap_or(contact_id).to_string();
        let now = now_rfc3339();

        let conversation_id = conversations::find_or_create(
            &self.db,
            Uuid::new_v4().to_string(),
            channel_kind,
            contact_id.to_string(),
            Some(contact_name),
            Some(contact_id.to_string()),
            now.clone(),
        )
        .await?;

        let history = client.find_messages(instance, jid, HISTORY_LIMIT).await?;
        if history.is_empty() {
            return Ok(false);
        }

        // A conversation that already received any message keeps its history
        // as-is; re-importing would duplicate on every sync call.
        if messages::count_for_conversation(&self.db, &conversation_id).await? > 0 {
            debug!(conversation_id, "conversation already has messages, skipping import");
            return Ok(true);
        }

        let rows: Vec<Message> = history
            .iter()
            .map(|entry| normalize_history_message(entry, &now))
            .filter(|n| !n.unsupported)
            .map(|n| Message {
                id: Uuid::new_v4().to_string(),
                conversation_id: conversation_id.clone(),
                sender_type: if n.from_me {
                    SenderRole::Seller
                } else {
                    SenderRole::Contact
                },
                sender_id: None,
                content: n.content,
                media_type: n.media_kind,
                media_url: None,
                provider_message_id: n.provider_message_id,
                is_read: true,
                created_at: n.timestamp,
            })
            .collect();

        if rows.is_empty() {
            return Ok(true);
        }

        let unread = rows
            .iter()
            .filter(|m| m.sender_type == SenderRole::Contact)
            .count() as i64;
        let last = rows
            .iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
            .cloned();

        let inserted = messages::insert_batch(&self.db, rows).await?;
        debug!(conversation_id, inserted, "history batch imported");

        if let Some(last) = last {
            conversations::update_last_message(
                &self.db,
                &conversation_id,
                &last.content,
                &last.created_at,
                Some(unread),
            )
            .await?;
        }

        Ok(true)
    }

    /// Create a lead from a conversation's contact fields and link it.
    ///
    /// There is no concurrency guard here: two racing promotions can both
    /// create a lead (the last link wins). Known limitation.
    pub async fn promote_to_lead(
        &self,
        conversation_id: &str,
        responsavel_id: Option<&str>,
    ) -> Result<Lead, ZapflowError> {
        let conversation = conversations::get(&self.db, conversation_id)
            .await?
            .ok_or_else(|| ZapflowError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            })?;

        if conversation.lead_id.is_some() {
            return Err(ZapflowError::Conflict(
                "conversation is already linked to a lead".to_string(),
            ));
        }

        let lead = Lead {
            id: Uuid::new_v4().to_string(),
            nome: conversation
                .contact_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "Novo Lead".to_string()),
            empresa: None,
            email: None,
            telefone: conversation.contact_phone,
            origem: conversation.origem.or(Some(LeadSource::Inbound)),
            status: "novo".to_string(),
            responsavel_id: responsavel_id.map(str::to_string),
            criado_via: Some(conversation.channel_type),
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
            utm_content: None,
            created_at: now_rfc3339(),
        };
        leads::insert_lead(&self.db, &lead).await?;
        conversations::set_lead(&self.db, conversation_id, &lead.id).await?;

        info!(conversation_id, lead_id = %lead.id, "conversation promoted to lead");
        Ok(lead)
    }

    /// Accept a pending conversation: set it active, assign the user, and
    /// (optionally) create a linked lead. Lead-creation failure does not
    /// undo the accept.
    pub async fn accept(
        &self,
        conversation_id: &str,
        user_id: &str,
        create_lead: bool,
    ) -> Result<Option<Lead>, ZapflowError> {
        let conversation = conversations::get(&self.db, conversation_id)
            .await?
            .ok_or_else(|| ZapflowError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            })?;

        conversations::set_status(&self.db, conversation_id, ConversationStatus::Ativo).await?;
        conversations::set_assigned(&self.db, conversation_id, user_id).await?;

        if create_lead && conversation.lead_id.is_none() {
            match self.promote_to_lead(conversation_id, Some(user_id)).await {
                Ok(lead) => return Ok(Some(lead)),
                Err(e) => warn!(conversation_id, error = %e, "lead creation on accept failed"),
            }
        }
        Ok(None)
    }

    /// Archive (reject) a conversation.
    pub async fn archive(&self, conversation_id: &str) -> Result<(), ZapflowError> {
        let changed =
            conversations::set_status(&self.db, conversation_id, ConversationStatus::Arquivado)
                .await?;
        if !changed {
            return Err(ZapflowError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            });
        }
        Ok(())
    }

    /// Zero the unread badge and flag stored messages as read.
    pub async fn mark_read(&self, conversation_id: &str) -> Result<(), ZapflowError> {
        conversations::clear_unread(&self.db, conversation_id).await?;
        messages::mark_read_for_conversation(&self.db, conversation_id).await
    }

    /// Retag a conversation's acquisition source.
    pub async fn update_origem(
        &self,
        conversation_id: &str,
        origem: LeadSource,
    ) -> Result<(), ZapflowError> {
        let changed = conversations::set_origem(&self.db, conversation_id, origem).await?;
        if !changed {
            return Err(ZapflowError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            });
        }
        Ok(())
    }

    /// Conversations in one workflow status, most recent first.
    pub async fn list_conversations(
        &self,
        status: ConversationStatus,
    ) -> Result<Vec<Conversation>, ZapflowError> {
        conversations::list_by_status(&self.db, status).await
    }

    /// A conversation's messages in chronological order.
    pub async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>, ZapflowError> {
        messages::list_for_conversation(&self.db, conversation_id).await
    }

    /// Persist a seller-authored message and forward it through a connected
    /// channel of the conversation's kind.
    ///
    /// The row is stored before forwarding; a provider failure surfaces to
    /// the caller but leaves the stored message in place.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        content: &str,
        client: &EvolutionClient,
    ) -> Result<SendOutcome, ZapflowError> {
        let conversation = conversations::get(&self.db, conversation_id)
            .await?
            .ok_or_else(|| ZapflowError::NotFound {
                entity: "conversation",
                id: conversation_id.to_string(),
            })?;

        let now = now_rfc3339();
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_type: SenderRole::Seller,
            sender_id: Some(user_id.to_string()),
            content: content.to_string(),
            media_type: None,
            media_url: None,
            provider_message_id: None,
            is_read: true,
            created_at: now.clone(),
        };
        messages::insert_message(&self.db, &message).await?;
        conversations::update_last_message(&self.db, conversation_id, content, &now, None).await?;

        let mut forwarded = false;
        if let Some(phone) = conversation.contact_phone.as_deref() {
            let channel = channels::list_channels(&self.db, None)
                .await?
                .into_iter()
                .find(|c| {
                    c.channel_type == conversation.channel_type
                        && c.is_active
                        && matches!(c.state, ConnectionState::Connected { .. })
                });
            match channel {
                Some(channel) => {
                    client.send_text(&channel.instance_name, phone, content).await?;
                    forwarded = true;
                }
                None => {
                    debug!(
                        conversation_id,
                        "no connected channel for outbound forward, stored locally only"
                    );
                }
            }
        }

        Ok(SendOutcome {
            message_id: message.id,
            forwarded,
        })
    }
}
