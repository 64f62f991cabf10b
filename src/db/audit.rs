// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Append-only audit log.

use super::{ts_col, Database};
use crate::error::AppError;
use crate::models::{AuditEntry, AuditRecord};
use crate::time_utils::format_db_timestamp;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

/// Append an entry using an open connection or transaction.
pub(crate) fn insert_audit(
    conn: &Connection,
    record: &AuditRecord,
    now: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    let detail = record.detail.as_ref().map(|d| d.to_string());
    conn.execute(
        "INSERT INTO audit_log (actor, action, resource_type, resource_id, detail, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.actor,
            record.action,
            record.resource_type,
            record.resource_id,
            detail,
            format_db_timestamp(now)
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    let detail: Option<String> = row.get(5)?;
    Ok(AuditEntry {
        id: row.get(0)?,
        actor: row.get(1)?,
        action: row.get(2)?,
        resource_type: row.get(3)?,
        resource_id: row.get(4)?,
        // Detail is written by insert_audit as JSON; keep unparseable text as a string
        detail: detail.map(|d| {
            serde_json::from_str(&d).unwrap_or(serde_json::Value::String(d))
        }),
        created_at: ts_col(row, 6)?,
    })
}

impl Database {
    pub async fn append_audit(
        &self,
        record: AuditRecord,
        now: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let id = self
            .conn
            .call(move |conn| -> Result<i64, rusqlite::Error> {
                insert_audit(conn, &record, now)
            })
            .await?;
        tracing::debug!(audit_id = id, "Audit entry appended");
        Ok(id)
    }

    /// Audit entries, oldest first, optionally filtered by resource.
    pub async fn list_audit(
        &self,
        resource_type: Option<String>,
        resource_id: Option<String>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, AppError> {
        let entries = self
            .conn
            .call(move |conn| -> Result<Vec<AuditEntry>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, actor, action, resource_type, resource_id, detail, created_at
                     FROM audit_log
                     WHERE (?1 IS NULL OR resource_type = ?1)
                       AND (?2 IS NULL OR resource_id = ?2)
                     ORDER BY id ASC
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(
                    params![resource_type, resource_id, limit as i64],
                    audit_from_row,
                )?;
                rows.collect()
            })
            .await?;
        Ok(entries)
    }
}
