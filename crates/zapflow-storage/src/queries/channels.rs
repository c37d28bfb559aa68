// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel queries. The tagged [`ConnectionState`] is flattened to its
//! `state`/`pairing_code`/`last_connected_at` columns here and nowhere else.

use rusqlite::params;
use zapflow_core::ZapflowError;
use zapflow_core::types::ConnectionState;

use crate::database::{Database, is_constraint_violation};
use crate::models::Channel;
use crate::queries::parse_text_col;

const CHANNEL_COLS: &str = "id, user_id, channel_type, instance_name, is_active, state, \
     pairing_code, last_connected_at, created_at";

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    let state: String = row.get(5)?;
    let pairing_code: Option<String> = row.get(6)?;
    let last_connected_at: Option<String> = row.get(7)?;
    Ok(Channel {
        id: row.get(0)?,
        user_id: row.get(1)?,
        channel_type: parse_text_col(2, row.get::<_, String>(2)?)?,
        instance_name: row.get(3)?,
        is_active: row.get(4)?,
        state: ConnectionState::from_columns(&state, pairing_code, last_connected_at),
        created_at: row.get(8)?,
    })
}

/// Create a channel. A duplicate `(user_id, instance_name)` pair surfaces as
/// [`ZapflowError::Conflict`] so the gateway can answer 409.
pub async fn create_channel(db: &Database, channel: &Channel) -> Result<(), ZapflowError> {
    let ch = channel.clone();
    let created = db
        .connection()
        .call(move |conn| {
            let result = conn.execute(
                "INSERT INTO channels
                   (id, user_id, channel_type, instance_name, is_active, state,
                    pairing_code, last_connected_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    ch.id,
                    ch.user_id,
                    ch.channel_type.to_string(),
                    ch.instance_name,
                    ch.is_active,
                    ch.state.status_str(),
                    ch.state.pairing_code(),
                    ch.state.connected_since(),
                    ch.created_at,
                ],
            );
            match result {
                Ok(_) => Ok(true),
                Err(e) if is_constraint_violation(&e) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)?;

    if created {
        Ok(())
    } else {
        Err(ZapflowError::Conflict(format!(
            "channel `{}` already exists for this user",
            channel.instance_name
        )))
    }
}

/// Get a channel by id.
pub async fn get_channel(db: &Database, id: &str) -> Result<Option<Channel>, ZapflowError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {CHANNEL_COLS} FROM channels WHERE id = ?1"))?;
            let result = stmt.query_row(params![id], row_to_channel);
            match result {
                Ok(channel) => Ok(Some(channel)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List channels, optionally restricted to one owner, newest first.
pub async fn list_channels(
    db: &Database,
    user_id: Option<&str>,
) -> Result<Vec<Channel>, ZapflowError> {
    let user_id = user_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let mut channels = Vec::new();
            match &user_id {
                Some(uid) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {CHANNEL_COLS} FROM channels
                         WHERE user_id = ?1 ORDER BY created_at DESC"
                    ))?;
                    let rows = stmt.query_map(params![uid], row_to_channel)?;
                    for row in rows {
                        channels.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {CHANNEL_COLS} FROM channels ORDER BY created_at DESC"
                    ))?;
                    let rows = stmt.query_map([], row_to_channel)?;
                    for row in rows {
                        channels.push(row?);
                    }
                }
            }
            Ok(channels)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Find the channel whose provider instance matches `instance_name`.
///
/// Used by the webhook ingress to resolve connection-update events.
pub async fn find_by_instance(
    db: &Database,
    instance_name: &str,
) -> Result<Option<Channel>, ZapflowError> {
    let instance_name = instance_name.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHANNEL_COLS} FROM channels WHERE instance_name = ?1"
            ))?;
            let result = stmt.query_row(params![instance_name], row_to_channel);
            match result {
                Ok(channel) => Ok(Some(channel)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Flip the active flag. Returns false when the channel does not exist.
pub async fn set_active(db: &Database, id: &str, active: bool) -> Result<bool, ZapflowError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE channels SET is_active = ?1 WHERE id = ?2",
                params![active, id],
            )?;
            Ok(n > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Persist a connection-state transition, optionally updating the active flag
/// in the same write. `last_connected_at` is only overwritten when the new
/// state carries a timestamp.
pub async fn update_state(
    db: &Database,
    id: &str,
    state: &ConnectionState,
    is_active: Option<bool>,
) -> Result<bool, ZapflowError> {
    let id = id.to_string();
    let status = state.status_str().to_string();
    let pairing_code = state.pairing_code().map(str::to_string);
    let connected_since = state.connected_since().map(str::to_string);
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "UPDATE channels SET
                   state = ?1,
                   pairing_code = ?2,
                   last_connected_at = COALESCE(?3, last_connected_at),
                   is_active = COALESCE(?4, is_active)
                 WHERE id = ?5",
                params![status, pairing_code, connected_since, is_active, id],
            )?;
            Ok(n > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Delete a channel. Returns false when it did not exist.
pub async fn delete_channel(db: &Database, id: &str) -> Result<bool, ZapflowError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute("DELETE FROM channels WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}
