// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Highlight storage and review transitions.

use super::audit::insert_audit;
use super::{enum_col, ts_col, Database};
use crate::error::AppError;
use crate::models::{
    AuditRecord, Highlight, HighlightOrigin, HighlightStatus, HighlightUpdate, NewHighlight,
};
use crate::time_utils::format_db_timestamp;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::json;

const HIGHLIGHT_COLUMNS: &str = "id, athlete_id, source_message_id, text, category, status, \
     origin, score, pinned, reviewed_by, created_at, updated_at";

fn highlight_from_row(row: &Row<'_>) -> rusqlite::Result<Highlight> {
    Ok(Highlight {
        id: row.get(0)?,
        athlete_id: row.get(1)?,
        source_message_id: row.get(2)?,
        text: row.get(3)?,
        category: enum_col(row, 4)?,
        status: enum_col(row, 5)?,
        origin: enum_col(row, 6)?,
        score: row.get(7)?,
        pinned: row.get(8)?,
        reviewed_by: row.get(9)?,
        created_at: ts_col(row, 10)?,
        updated_at: ts_col(row, 11)?,
    })
}

fn select_highlight(conn: &Connection, id: i64) -> rusqlite::Result<Option<Highlight>> {
    conn.query_row(
        &format!("SELECT {} FROM highlights WHERE id = ?1", HIGHLIGHT_COLUMNS),
        params![id],
        highlight_from_row,
    )
    .optional()
}

enum Applied {
    Updated(Highlight),
    Missing,
    /// The status is not valid for the highlight's origin
    Refused(HighlightOrigin),
}

fn refused(id: i64, origin: HighlightOrigin, status: Option<HighlightStatus>) -> AppError {
    let status = status.map(|s| s.to_string()).unwrap_or_default();
    AppError::BadRequest(format!(
        "highlight {} is {} and cannot be set to {}",
        id, origin, status
    ))
}

/// Apply `update` to one highlight and audit the change.
fn apply_update(
    conn: &Connection,
    id: i64,
    update: &HighlightUpdate,
    actor: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<Applied> {
    let Some(before) = select_highlight(conn, id)? else {
        return Ok(Applied::Missing);
    };
    if let Some(status) = update.status {
        if !before.origin.allows_status(status) {
            return Ok(Applied::Refused(before.origin));
        }
    }

    conn.execute(
        "UPDATE highlights SET
             status = COALESCE(?1, status),
             text = COALESCE(?2, text),
             category = COALESCE(?3, category),
             pinned = COALESCE(?4, pinned),
             reviewed_by = CASE WHEN ?1 IS NULL THEN reviewed_by ELSE COALESCE(?5, ?6) END,
             updated_at = ?7
         WHERE id = ?8",
        params![
            update.status.map(|s| s.to_string()),
            update.text,
            update.category.map(|c| c.to_string()),
            update.pinned,
            update.reviewed_by,
            actor,
            format_db_timestamp(now),
            id
        ],
    )?;

    let mut detail = serde_json::Map::new();
    if let Some(status) = update.status {
        detail.insert("from".into(), json!(before.status));
        detail.insert("to".into(), json!(status));
    }
    if let Some(text) = &update.text {
        detail.insert("text".into(), json!(text));
    }
    if let Some(category) = update.category {
        detail.insert("category".into(), json!(category));
    }
    if let Some(pinned) = update.pinned {
        detail.insert("pinned".into(), json!(pinned));
    }
    if let Some(reviewed_by) = &update.reviewed_by {
        detail.insert("reviewed_by".into(), json!(reviewed_by));
    }

    let action = match update.status {
        Some(HighlightStatus::Accepted) => "highlight.accept",
        Some(HighlightStatus::Rejected) => "highlight.reject",
        Some(HighlightStatus::Suggested) => "highlight.reopen",
        None => "highlight.edit",
    };
    insert_audit(
        conn,
        &AuditRecord::new(actor, action, "highlight", id)
            .with_detail(serde_json::Value::Object(detail)),
        now,
    )?;

    Ok(match select_highlight(conn, id)? {
        Some(highlight) => Applied::Updated(highlight),
        None => Applied::Missing,
    })
}

impl Database {
    /// Insert a highlight in its origin's initial status and audit it.
    pub async fn insert_highlight(
        &self,
        highlight: NewHighlight,
        actor: String,
        now: DateTime<Utc>,
    ) -> Result<Highlight, AppError> {
        let highlight = self
            .conn
            .call(move |conn| -> Result<Highlight, rusqlite::Error> {
                let tx = conn.transaction()?;
                let ts = format_db_timestamp(now);
                let status = highlight.origin.initial_status();
                tx.execute(
                    "INSERT INTO highlights (athlete_id, source_message_id, text, category,
                         status, origin, score, pinned, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                    params![
                        highlight.athlete_id,
                        highlight.source_message_id,
                        highlight.text,
                        highlight.category.to_string(),
                        status.to_string(),
                        highlight.origin.to_string(),
                        highlight.score.clamp(0.0, 1.0),
                        highlight.pinned,
                        ts
                    ],
                )?;
                let id = tx.last_insert_rowid();
                let action = match highlight.origin {
                    HighlightOrigin::Ai => "highlight.suggest",
                    HighlightOrigin::Manual => "highlight.create",
                };
                insert_audit(
                    &tx,
                    &AuditRecord::new(actor, action, "highlight", id).with_detail(json!({
                        "athlete_id": highlight.athlete_id,
                        "source_message_id": highlight.source_message_id,
                        "category": highlight.category,
                    })),
                    now,
                )?;
                let row = tx.query_row(
                    &format!("SELECT {} FROM highlights WHERE id = ?1", HIGHLIGHT_COLUMNS),
                    params![id],
                    highlight_from_row,
                )?;
                tx.commit()?;
                Ok(row)
            })
            .await?;
        Ok(highlight)
    }

    pub async fn get_highlight(&self, id: i64) -> Result<Option<Highlight>, AppError> {
        let highlight = self
            .conn
            .call(move |conn| -> Result<Option<Highlight>, rusqlite::Error> {
                select_highlight(conn, id)
            })
            .await?;
        Ok(highlight)
    }

    /// Highlights of an athlete, pinned first then newest first.
    pub async fn list_highlights(
        &self,
        athlete_id: i64,
        status: Option<HighlightStatus>,
        origin: Option<HighlightOrigin>,
    ) -> Result<Vec<Highlight>, AppError> {
        let status = status.map(|s| s.to_string());
        let origin = origin.map(|o| o.to_string());
        let highlights = self
            .conn
            .call(move |conn| -> Result<Vec<Highlight>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM highlights
                     WHERE athlete_id = ?1
                       AND (?2 IS NULL OR status = ?2)
                       AND (?3 IS NULL OR origin = ?3)
                     ORDER BY pinned DESC, created_at DESC, id DESC",
                    HIGHLIGHT_COLUMNS
                ))?;
                let rows = stmt.query_map(params![athlete_id, status, origin], highlight_from_row)?;
                rows.collect()
            })
            .await?;
        Ok(highlights)
    }

    /// Texts of the athlete's suggested and accepted highlights.
    pub async fn active_highlight_texts(&self, athlete_id: i64) -> Result<Vec<String>, AppError> {
        let texts = self
            .conn
            .call(move |conn| -> Result<Vec<String>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT text FROM highlights
                     WHERE athlete_id = ?1 AND status IN ('suggested', 'accepted')",
                )?;
                let rows = stmt.query_map(params![athlete_id], |row| row.get(0))?;
                rows.collect()
            })
            .await?;
        Ok(texts)
    }

    /// AI suggestions still pending review for one source message.
    pub async fn suggested_highlights_for_message(
        &self,
        message_id: i64,
    ) -> Result<Vec<Highlight>, AppError> {
        let highlights = self
            .conn
            .call(move |conn| -> Result<Vec<Highlight>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM highlights
                     WHERE source_message_id = ?1 AND origin = 'ai' AND status = 'suggested'
                     ORDER BY id ASC",
                    HIGHLIGHT_COLUMNS
                ))?;
                let rows = stmt.query_map(params![message_id], highlight_from_row)?;
                rows.collect()
            })
            .await?;
        Ok(highlights)
    }

    /// Apply a reviewer update. Returns `None` if the highlight does not exist.
    ///
    /// Moving a manual highlight back to `suggested` is a bad request.
    pub async fn update_highlight(
        &self,
        id: i64,
        update: HighlightUpdate,
        actor: String,
        now: DateTime<Utc>,
    ) -> Result<Option<Highlight>, AppError> {
        let status = update.status;
        let applied = self
            .conn
            .call(move |conn| -> Result<Applied, rusqlite::Error> {
                let tx = conn.transaction()?;
                let applied = apply_update(&tx, id, &update, &actor, now)?;
                if matches!(applied, Applied::Updated(_)) {
                    tx.commit()?;
                }
                Ok(applied)
            })
            .await?;
        match applied {
            Applied::Updated(highlight) => Ok(Some(highlight)),
            Applied::Missing => Ok(None),
            Applied::Refused(origin) => Err(refused(id, origin, status)),
        }
    }

    /// Apply the same status to many highlights in one transaction.
    ///
    /// Returns the updated highlights and the ids that were not found.
    /// One highlight refusing the status rolls back the whole batch.
    pub async fn bulk_update_highlight_status(
        &self,
        ids: Vec<i64>,
        status: HighlightStatus,
        reviewed_by: Option<String>,
        actor: String,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Highlight>, Vec<i64>), AppError> {
        let result = self
            .conn
            .call(
                move |conn| -> Result<Result<(Vec<Highlight>, Vec<i64>), AppError>, rusqlite::Error> {
                    let tx = conn.transaction()?;
                    let update = HighlightUpdate {
                        status: Some(status),
                        reviewed_by,
                        ..Default::default()
                    };
                    let mut updated = Vec::new();
                    let mut missing = Vec::new();
                    for id in ids {
                        match apply_update(&tx, id, &update, &actor, now)? {
                            Applied::Updated(h) => updated.push(h),
                            Applied::Missing => missing.push(id),
                            Applied::Refused(origin) => {
                                return Ok(Err(refused(id, origin, Some(status))));
                            }
                        }
                    }
                    tx.commit()?;
                    Ok(Ok((updated, missing)))
                },
            )
            .await?;
        result
    }

    /// Delete a highlight. Returns false if it did not exist.
    pub async fn delete_highlight(
        &self,
        id: i64,
        actor: String,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let deleted = self
            .conn
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let tx = conn.transaction()?;
                let Some(before) = select_highlight(&tx, id)? else {
                    return Ok(false);
                };
                tx.execute("DELETE FROM highlights WHERE id = ?1", params![id])?;
                insert_audit(
                    &tx,
                    &AuditRecord::new(actor, "highlight.delete", "highlight", id).with_detail(
                        json!({ "athlete_id": before.athlete_id, "text": before.text }),
                    ),
                    now,
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;
        Ok(deleted)
    }
}
