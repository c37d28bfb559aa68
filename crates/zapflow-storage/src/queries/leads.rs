// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lead queries.

use rusqlite::params;
use zapflow_core::ZapflowError;

use crate::database::Database;
use crate::models::Lead;
use crate::queries::{parse_opt_text_col, parse_text_col};

const LEAD_COLS: &str = "id, nome, empresa, email, telefone, origem, status, responsavel_id, \
     criado_via, utm_source, utm_medium, utm_campaign, utm_content, created_at";

fn row_to_lead(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: row.get(0)?,
        nome: row.get(1)?,
        empresa: row.get(2)?,
        email: row.get(3)?,
        telefone: row.get(4)?,
        origem: parse_opt_text_col(5, row.get::<_, Option<String>>(5)?)?,
        status: row.get(6)?,
        responsavel_id: row.get(7)?,
        criado_via: parse_opt_text_col(8, row.get::<_, Option<String>>(8)?)?,
        utm_source: row.get(9)?,
        utm_medium: row.get(10)?,
        utm_campaign: row.get(11)?,
        utm_content: row.get(12)?,
        created_at: row.get(13)?,
    })
}

/// Insert a new lead.
pub async fn insert_lead(db: &Database, lead: &Lead) -> Result<(), ZapflowError> {
    let lead = lead.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO leads
                   (id, nome, empresa, email, telefone, origem, status, responsavel_id,
                    criado_via, utm_source, utm_medium, utm_campaign, utm_content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    lead.id,
                    lead.nome,
                    lead.empresa,
                    lead.email,
                    lead.telefone,
                    lead.origem.map(|o| o.to_string()),
                    lead.status,
                    lead.responsavel_id,
                    lead.criado_via.map(|c| c.to_string()),
                    lead.utm_source,
                    lead.utm_medium,
                    lead.utm_campaign,
                    lead.utm_content,
                    lead.created_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a lead by id.
pub async fn get_lead(db: &Database, id: &str) -> Result<Option<Lead>, ZapflowError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT {LEAD_COLS} FROM leads WHERE id = ?1"))?;
            let result = stmt.query_row(params![id], row_to_lead);
            match result {
                Ok(lead) => Ok(Some(lead)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}
