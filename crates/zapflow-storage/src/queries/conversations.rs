// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation queries, including the reconciliation upsert.
//!
//! The `(channel_type, external_contact_id)` UNIQUE constraint does the heavy
//! lifting: concurrent creates for the same contact collapse onto one row via
//! `ON CONFLICT DO UPDATE`, so the losing writer becomes an update instead of
//! a failure.

use rusqlite::params;
use zapflow_core::types::{ChannelKind, ConversationStatus, LeadSource};
use zapflow_core::ZapflowError;

use crate::database::Database;
use crate::models::Conversation;
use crate::queries::{parse_opt_text_col, parse_text_col};

const CONVERSATION_COLS: &str = "id, channel_type, external_contact_id, contact_name, \
     contact_phone, status, origem, lead_id, last_message, last_message_at, unread_count, \
     assigned_to, created_at, updated_at";

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        channel_type: parse_text_col(1, row.get::<_, String>(1)?)?,
        external_contact_id: row.get(2)?,
        contact_name: row.get(3)?,
        contact_phone: row.get(4)?,
        status: parse_text_col(5, row.get::<_, String>(5)?)?,
        origem: parse_opt_text_col(6, row.get::<_, Option<String>>(6)?)?,
        lead_id: row.get(7)?,
        last_message: row.get(8)?,
        last_message_at: row.get(9)?,
        unread_count: row.get(10)?,
        assigned_to: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

/// Parameters for the live-ingest conversation upsert.
#[derive(Debug, Clone)]
pub struct InboundUpsert {
    /// Row id used only if the insert wins; ignored on conflict.
    pub id_candidate: String,
    pub channel_type: ChannelKind,
    pub external_contact_id: String,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub origem: LeadSource,
    pub last_message: String,
    pub last_message_at: String,
    pub now: String,
}

/// Create-or-update a conversation for a live inbound message.
///
/// On first contact: new row in `pendente` status with unread 1. On an
/// existing row: bump last-message fields, increment unread atomically, and
/// fill in the contact name only when it was previously unset.
///
/// Returns the id of the (created or pre-existing) conversation.
pub async fn upsert_inbound(db: &Database, up: InboundUpsert) -> Result<String, ZapflowError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO conversations
                   (id, channel_type, external_contact_id, contact_name, contact_phone,
                    status, origem, last_message, last_message_at, unread_count,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pendente', ?6, ?7, ?8, 1, ?9, ?9)
                 ON CONFLICT (channel_type, external_contact_id) DO UPDATE SET
                   last_message = excluded.last_message,
                   last_message_at = excluded.last_message_at,
                   unread_count = conversations.unread_count + 1,
                   contact_name = CASE
                       WHEN conversations.contact_name IS NULL
                            OR conversations.contact_name = ''
                       THEN excluded.contact_name
                       ELSE conversations.contact_name
                   END,
                   updated_at = excluded.updated_at",
                params![
                    up.id_candidate,
                    up.channel_type.to_string(),
                    up.external_contact_id,
                    up.contact_name,
                    up.contact_phone,
                    up.origem.to_string(),
                    up.last_message,
                    up.last_message_at,
                    up.now,
                ],
            )?;
            let id = conn.query_row(
                "SELECT id FROM conversations
                 WHERE channel_type = ?1 AND external_contact_id = ?2",
                params![up.channel_type.to_string(), up.external_contact_id],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Find a conversation by its reconciliation key, creating it in `pendente`
/// status with unread 0 when absent (bulk-sync path: no speculative unread).
pub async fn find_or_create(
    db: &Database,
    id_candidate: String,
    channel_type: ChannelKind,
    external_contact_id: String,
    contact_name: Option<String>,
    contact_phone: Option<String>,
    now: String,
) -> Result<String, ZapflowError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO conversations
                   (id, channel_type, external_contact_id, contact_name, contact_phone,
                    status, origem, unread_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pendente', 'inbound', 0, ?6, ?6)
                 ON CONFLICT (channel_type, external_contact_id) DO NOTHING",
                params![
                    id_candidate,
                    channel_type.to_string(),
                    external_contact_id,
                    contact_name,
                    contact_phone,
                    now,
                ],
            )?;
            let id = conn.query_row(
                "SELECT id FROM conversations
                 WHERE channel_type = ?1 AND external_contact_id = ?2",
                params![channel_type.to_string(), external_contact_id],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a conversation by id.
pub async fn get(db: &Database, id: &str) -> Result<Option<Conversation>, ZapflowError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLS} FROM conversations WHERE id = ?1"
            ))?;
            let result = stmt.query_row(params![id], row_to_conversation);
            match result {
                Ok(conv) => Ok(Some(conv)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a conversation by its `(channel kind, external contact id)` key.
pub async fn get_by_key(
    db: &Database,
    channel_type: ChannelKind,
    external_contact_id: &str,
) -> Result<Option<Conversation>, ZapflowError> {
    let external_contact_id = external_contact_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLS} FROM conversations
                 WHERE channel_type = ?1 AND external_contact_id = ?2"
            ))?;
            let result = stmt.query_row(
                params![channel_type.to_string(), external_contact_id],
                row_to_conversation,
            );
            match result {
                Ok(conv) => Ok(Some(conv)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List conversations in a workflow status, most recent activity first.
pub async fn list_by_status(
    db: &Database,
    status: ConversationStatus,
) -> Result<Vec<Conversation>, ZapflowError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONVERSATION_COLS} FROM conversations
                 WHERE status = ?1 ORDER BY last_message_at DESC"
            ))?;
            let rows = stmt.query_map(params![status.to_string()], row_to_conversation)?;
            let mut conversations = Vec::new();
            for row in rows {
                conversations.push(row?);
            }
            Ok(conversations)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Set the workflow status. Returns false when the conversation does not exist.
pub async fn set_status(
    db: &Database,
    id: &str,
    status: ConversationStatus,
) -> Result<bool, ZapflowError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE conversations SET status = ?1,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?2",
                params![status.to_string(), id],
            )?;
            Ok(n > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Assign an owner. Returns false when the conversation does not exist.
pub async fn set_assigned(db: &Database, id: &str, user_id: &str) -> Result<bool, ZapflowError> {
    let id = id.to_string();
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE conversations SET assigned_to = ?1,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?2",
                params![user_id, id],
            )?;
            Ok(n > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Link a lead to the conversation.
pub async fn set_lead(db: &Database, id: &str, lead_id: &str) -> Result<bool, ZapflowError> {
    let id = id.to_string();
    let lead_id = lead_id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE conversations SET lead_id = ?1,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?2",
                params![lead_id, id],
            )?;
            Ok(n > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Retag the acquisition source.
pub async fn set_origem(
    db: &Database,
    id: &str,
    origem: LeadSource,
) -> Result<bool, ZapflowError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE conversations SET origem = ?1,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?2",
                params![origem.to_string(), id],
            )?;
            Ok(n > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Update the denormalized last-message fields, optionally overwriting the
/// unread counter (bulk sync sets it to the imported contact-message count;
/// outbound sends leave it untouched).
pub async fn update_last_message(
    db: &Database,
    id: &str,
    content: &str,
    at: &str,
    unread_count: Option<i64>,
) -> Result<(), ZapflowError> {
    let id = id.to_string();
    let content = content.to_string();
    let at = at.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE conversations SET
                   last_message = ?1,
                   last_message_at = ?2,
                   unread_count = COALESCE(?3, unread_count),
                   updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?4",
                params![content, at, unread_count, id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Zero the unread counter.
pub async fn clear_unread(db: &Database, id: &str) -> Result<(), ZapflowError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE conversations SET unread_count = 0,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn inbound(contact: &str, content: &str, at: &str) -> InboundUpsert {
        InboundUpsert {
            id_candidate: format!("conv-{contact}-{at}"),
            channel_type: ChannelKind::Whatsapp,
            external_contact_id: contact.to_string(),
            contact_name: Some("Maria".to_string()),
            contact_phone: Some(contact.to_string()),
            origem: LeadSource::Inbound,
            last_message: content.to_string(),
            last_message_at: at.to_string(),
            now: at.to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_creates_then_updates_same_row() {
        let (db, _dir) = setup_db().await;

        let id1 = upsert_inbound(&db, inbound("5511999", "oi", "2026-01-01T00:00:01Z"))
            .await
            .unwrap();
        let id2 = upsert_inbound(&db, inbound("5511999", "tudo bem?", "2026-01-01T00:00:02Z"))
            .await
            .unwrap();
        assert_eq!(id1, id2, "same contact must land on the same conversation");

        let conv = get(&db, &id1).await.unwrap().unwrap();
        assert_eq!(conv.status, ConversationStatus::Pendente);
        assert_eq!(conv.unread_count, 2);
        assert_eq!(conv.last_message.as_deref(), Some("tudo bem?"));
        assert_eq!(conv.last_message_at.as_deref(), Some("2026-01-01T00:00:02Z"));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn upsert_keeps_existing_contact_name() {
        let (db, _dir) = setup_db().await;

        let id = upsert_inbound(&db, inbound("5511888", "first", "2026-01-01T00:00:01Z"))
            .await
            .unwrap();

        let mut second = inbound("5511888", "second", "2026-01-01T00:00:02Z");
        second.contact_name = Some("Someone Else".to_string());
        upsert_inbound(&db, second).await.unwrap();

        let conv = get(&db, &id).await.unwrap().unwrap();
        assert_eq!(conv.contact_name.as_deref(), Some("Maria"));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn upsert_fills_in_missing_contact_name() {
        let (db, _dir) = setup_db().await;

        let mut first = inbound("5511777", "first", "2026-01-01T00:00:01Z");
        first.contact_name = None;
        let id = upsert_inbound(&db, first).await.unwrap();

        upsert_inbound(&db, inbound("5511777", "second", "2026-01-01T00:00:02Z"))
            .await
            .unwrap();

        let conv = get(&db, &id).await.unwrap().unwrap();
        assert_eq!(conv.contact_name.as_deref(), Some("Maria"));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn find_or_create_does_not_touch_unread() {
        let (db, _dir) = setup_db().await;

        let id = find_or_create(
            &db,
            "conv-sync-1".to_string(),
            ChannelKind::Whatsapp,
            "5511666".to_string(),
            Some("Ana".to_string()),
            Some("5511666".to_string()),
            "2026-01-01T00:00:00Z".to_string(),
        )
        .await
        .unwrap();

        // Second call finds the same row and changes nothing.
        let id2 = find_or_create(
            &db,
            "conv-sync-2".to_string(),
            ChannelKind::Whatsapp,
            "5511666".to_string(),
            None,
            None,
            "2026-01-01T00:00:05Z".to_string(),
        )
        .await
        .unwrap();
        assert_eq!(id, id2);

        let conv = get(&db, &id).await.unwrap().unwrap();
        assert_eq!(conv.unread_count, 0);
        assert_eq!(conv.contact_name.as_deref(), Some("Ana"));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn same_contact_on_other_channel_is_a_new_conversation() {
        let (db, _dir) = setup_db().await;

        let wa = upsert_inbound(&db, inbound("5511555", "via zap", "2026-01-01T00:00:01Z"))
            .await
            .unwrap();
        let mut insta = inbound("5511555", "via insta", "2026-01-01T00:00:02Z");
        insta.channel_type = ChannelKind::Instagram;
        insta.id_candidate = "conv-insta".to_string();
        let ig = upsert_inbound(&db, insta).await.unwrap();

        assert_ne!(wa, ig);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn list_by_status_orders_by_recency() {
        let (db, _dir) = setup_db().await;

        upsert_inbound(&db, inbound("111", "old", "2026-01-01T00:00:01Z"))
            .await
            .unwrap();
        upsert_inbound(&db, inbound("222", "new", "2026-01-02T00:00:01Z"))
            .await
            .unwrap();

        let pending = list_by_status(&db, ConversationStatus::Pendente).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].external_contact_id, "222");
        assert_eq!(pending[1].external_contact_id, "111");

        assert!(list_by_status(&db, ConversationStatus::Ativo)
            .await
            .unwrap()
            .is_empty());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn status_and_assignment_updates() {
        let (db, _dir) = setup_db().await;

        let id = upsert_inbound(&db, inbound("333", "oi", "2026-01-01T00:00:01Z"))
            .await
            .unwrap();

        assert!(set_status(&db, &id, ConversationStatus::Ativo).await.unwrap());
        assert!(set_assigned(&db, &id, "user-7").await.unwrap());
        assert!(set_lead(&db, &id, "lead-1").await.unwrap());
        clear_unread(&db, &id).await.unwrap();

        let conv = get(&db, &id).await.unwrap().unwrap();
        assert_eq!(conv.status, ConversationStatus::Ativo);
        assert_eq!(conv.assigned_to.as_deref(), Some("user-7"));
        assert_eq!(conv.lead_id.as_deref(), Some("lead-1"));
        assert_eq!(conv.unread_count, 0);

        assert!(!set_status(&db, "missing", ConversationStatus::Ativo).await.unwrap());

        db.close().await.unwrap();
    }
}
