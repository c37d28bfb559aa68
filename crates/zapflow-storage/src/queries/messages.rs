// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message queries. Messages are append-only; there is no update path.

use rusqlite::params;
use zapflow_core::ZapflowError;

use crate::database::Database;
use crate::models::Message;
use crate::queries::{parse_opt_text_col, parse_text_col};

const MESSAGE_COLS: &str = "id, conversation_id, sender_type, sender_id, content, media_type, \
     media_url, provider_message_id, is_read, created_at";

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_type: parse_text_col(2, row.get::<_, String>(2)?)?,
        sender_id: row.get(3)?,
        content: row.get(4)?,
        media_type: parse_opt_text_col(5, row.get::<_, Option<String>>(5)?)?,
        media_url: row.get(6)?,
        provider_message_id: row.get(7)?,
        is_read: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn insert_sql() -> &'static str {
    // OR IGNORE implements duplicate suppression on the
    // (conversation_id, provider_message_id) key for at-least-once webhook
    // delivery; rows without a provider id never conflict.
    "INSERT OR IGNORE INTO messages
       (id, conversation_id, sender_type, sender_id, content, media_type,
        media_url, provider_message_id, is_read, created_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
}

/// Insert a message. Returns false when a duplicate provider message id was
/// suppressed instead of inserted.
pub async fn insert_message(db: &Database, msg: &Message) -> Result<bool, ZapflowError> {
    let msg = msg.clone();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                insert_sql(),
                params![
                    msg.id,
                    msg.conversation_id,
                    msg.sender_type.to_string(),
                    msg.sender_id,
                    msg.content,
                    msg.media_type.map(|m| m.to_string()),
                    msg.media_url,
                    msg.provider_message_id,
                    msg.is_read,
                    msg.created_at,
                ],
            )?;
            Ok(n > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Insert a batch of messages in one transaction. Returns the number of rows
/// actually inserted (duplicates are suppressed, not counted).
pub async fn insert_batch(db: &Database, msgs: Vec<Message>) -> Result<usize, ZapflowError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0usize;
            for msg in &msgs {
                inserted += tx.execute(
                    insert_sql(),
                    params![
                        msg.id,
                        msg.conversation_id,
                        msg.sender_type.to_string(),
                        msg.sender_id,
                        msg.content,
                        msg.media_type.map(|m| m.to_string()),
                        msg.media_url,
                        msg.provider_message_id,
                        msg.is_read,
                        msg.created_at,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Messages of a conversation in chronological order.
pub async fn list_for_conversation(
    db: &Database,
    conversation_id: &str,
) -> Result<Vec<Message>, ZapflowError> {
    let conversation_id = conversation_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLS} FROM messages
                 WHERE conversation_id = ?1 ORDER BY created_at ASC"
            ))?;
            let rows = stmt.query_map(params![conversation_id], row_to_message)?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            Ok(messages)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Number of stored messages in a conversation (the bulk-sync idempotence guard).
pub async fn count_for_conversation(
    db: &Database,
    conversation_id: &str,
) -> Result<i64, ZapflowError> {
    let conversation_id = conversation_id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.query_row(
                "SELECT count(*) FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            Ok(n)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Flag every message of a conversation as read.
pub async fn mark_read_for_conversation(
    db: &Database,
    conversation_id: &str,
) -> Result<(), ZapflowError> {
    let conversation_id = conversation_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE messages SET is_read = 1 WHERE conversation_id = ?1",
                params![conversation_id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::conversations::{self, InboundUpsert};
    use tempfile::tempdir;
    use zapflow_core::types::{ChannelKind, LeadSource, SenderRole};

    async fn setup_db_with_conversation() -> (Database, String, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();

        let conv_id = conversations::upsert_inbound(
            &db,
            InboundUpsert {
                id_candidate: "conv-1".to_string(),
                channel_type: ChannelKind::Whatsapp,
                external_contact_id: "5511999".to_string(),
                contact_name: Some("Maria".to_string()),
                contact_phone: Some("5511999".to_string()),
                origem: LeadSource::Inbound,
                last_message: "oi".to_string(),
                last_message_at: "2026-01-01T00:00:01Z".to_string(),
                now: "2026-01-01T00:00:01Z".to_string(),
            },
        )
        .await
        .unwrap();

        (db, conv_id, dir)
    }

    fn make_msg(id: &str, conv: &str, content: &str, provider_id: Option<&str>) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: conv.to_string(),
            sender_type: SenderRole::Contact,
            sender_id: None,
            content: content.to_string(),
            media_type: None,
            media_url: None,
            provider_message_id: provider_id.map(str::to_string),
            is_read: false,
            created_at: format!("2026-01-01T00:00:0{}Z", id.len() % 10),
        }
    }

    #[tokio::test]
    async fn insert_and_list_in_order() {
        let (db, conv, _dir) = setup_db_with_conversation().await;

        let mut m1 = make_msg("m1", &conv, "primeira", None);
        m1.created_at = "2026-01-01T00:00:01Z".to_string();
        let mut m2 = make_msg("m2", &conv, "segunda", None);
        m2.created_at = "2026-01-01T00:00:02Z".to_string();

        assert!(insert_message(&db, &m1).await.unwrap());
        assert!(insert_message(&db, &m2).await.unwrap());

        let messages = list_for_conversation(&db, &conv).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "primeira");
        assert_eq!(messages[1].content, "segunda");

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_provider_message_id_is_suppressed() {
        let (db, conv, _dir) = setup_db_with_conversation().await;

        let first = make_msg("m1", &conv, "oi", Some("WAMID-1"));
        let redelivery = make_msg("m2", &conv, "oi", Some("WAMID-1"));

        assert!(insert_message(&db, &first).await.unwrap());
        assert!(!insert_message(&db, &redelivery).await.unwrap());

        assert_eq!(count_for_conversation(&db, &conv).await.unwrap(), 1);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn messages_without_provider_id_never_conflict() {
        let (db, conv, _dir) = setup_db_with_conversation().await;

        assert!(insert_message(&db, &make_msg("m1", &conv, "a", None)).await.unwrap());
        assert!(insert_message(&db, &make_msg("m2", &conv, "a", None)).await.unwrap());

        assert_eq!(count_for_conversation(&db, &conv).await.unwrap(), 2);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn batch_insert_counts_only_new_rows() {
        let (db, conv, _dir) = setup_db_with_conversation().await;

        insert_message(&db, &make_msg("m0", &conv, "live", Some("WAMID-0")))
            .await
            .unwrap();

        let batch = vec![
            make_msg("b1", &conv, "hist 1", Some("WAMID-0")), // duplicate of live
            make_msg("b2", &conv, "hist 2", Some("WAMID-2")),
            make_msg("b3", &conv, "hist 3", None),
        ];
        let inserted = insert_batch(&db, batch).await.unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(count_for_conversation(&db, &conv).await.unwrap(), 3);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn mark_read_flags_all_rows() {
        let (db, conv, _dir) = setup_db_with_conversation().await;

        insert_message(&db, &make_msg("m1", &conv, "a", None)).await.unwrap();
        insert_message(&db, &make_msg("m2", &conv, "b", None)).await.unwrap();

        mark_read_for_conversation(&db, &conv).await.unwrap();

        let messages = list_for_conversation(&db, &conv).await.unwrap();
        assert!(messages.iter().all(|m| m.is_read));

        db.close().await.unwrap();
    }
}
