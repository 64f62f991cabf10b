// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outbox queue: enqueue, claim and result transitions.
//!
//! An entry is claimed by stamping a lease (`locked_until`) and a fresh
//! `claim_token`, and the claim counts one attempt. Result updates only apply
//! while the caller still holds the token and the entry is still `pending`,
//! so `sent` and `dead` never change.
//!
//! A retryable failure is recorded as an `outbox.failed` audit entry and the
//! row goes back to `pending` with a later `next_attempt_at`, in one
//! transaction.

use super::audit::insert_audit;
use super::messages::attach_conversation;
use super::{enum_col, json_col, opt_ts_col, ts_col, Database};
use crate::error::AppError;
use crate::models::{
    AuditRecord, Channel, OutboxEntry, OutboxPayload, OutboxStatus, SYSTEM_ACTOR,
};
use crate::time_utils::format_db_timestamp;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::json;

const OUTBOX_COLUMNS: &str = "id, message_id, athlete_id, channel, recipient, payload, status, \
     attempts, next_attempt_at, last_error, locked_until, claim_token, sent_at, created_at, \
     updated_at";

/// Result of one claim sweep.
#[derive(Debug, Default)]
pub struct ClaimBatch {
    /// Entries now leased to the caller
    pub claimed: Vec<OutboxEntry>,
    /// Entries dead-lettered because every attempt was used up
    pub exhausted: Vec<i64>,
}

fn outbox_from_row(row: &Row<'_>) -> rusqlite::Result<OutboxEntry> {
    Ok(OutboxEntry {
        id: row.get(0)?,
        message_id: row.get(1)?,
        athlete_id: row.get(2)?,
        channel: enum_col(row, 3)?,
        recipient: row.get(4)?,
        payload: json_col(row, 5)?,
        status: enum_col(row, 6)?,
        attempts: row.get(7)?,
        next_attempt_at: ts_col(row, 8)?,
        last_error: row.get(9)?,
        locked_until: opt_ts_col(row, 10)?,
        claim_token: row.get(11)?,
        sent_at: opt_ts_col(row, 12)?,
        created_at: ts_col(row, 13)?,
        updated_at: ts_col(row, 14)?,
    })
}

/// New outbound delivery.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub athlete_id: i64,
    pub channel: Channel,
    pub recipient: String,
    pub payload: OutboxPayload,
}

impl Database {
    /// Record an outbound message and its pending delivery in one transaction.
    ///
    /// Returns `(message_id, outbox_id)`.
    pub async fn enqueue_outbound(
        &self,
        request: OutboundRequest,
        idle_cutoff: DateTime<Utc>,
        actor: String,
        now: DateTime<Utc>,
    ) -> Result<(i64, i64), AppError> {
        let payload_json = serde_json::to_string(&request.payload)
            .map_err(|e| AppError::Internal(e.into()))?;
        let ids = self
            .conn
            .call(move |conn| -> Result<(i64, i64), rusqlite::Error> {
                let tx = conn.transaction()?;
                let ts = format_db_timestamp(now);
                let conversation_id =
                    attach_conversation(&tx, request.athlete_id, request.channel, now, idle_cutoff)?;

                tx.execute(
                    "INSERT INTO messages (conversation_id, athlete_id, channel, direction, body,
                         sender, received_at, created_at)
                     VALUES (?1, ?2, ?3, 'outbound', ?4, ?5, ?6, ?6)",
                    params![
                        conversation_id,
                        request.athlete_id,
                        request.channel.to_string(),
                        request.payload.text,
                        format!("coach:{}", actor),
                        ts
                    ],
                )?;
                let message_id = tx.last_insert_rowid();

                tx.execute(
                    "INSERT INTO outbox (message_id, athlete_id, channel, recipient, payload,
                         status, attempts, next_attempt_at, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6, ?6, ?6)",
                    params![
                        message_id,
                        request.athlete_id,
                        request.channel.to_string(),
                        request.recipient,
                        payload_json,
                        ts
                    ],
                )?;
                let outbox_id = tx.last_insert_rowid();

                insert_audit(
                    &tx,
                    &AuditRecord::new(actor, "outbox.enqueue", "outbox", outbox_id).with_detail(
                        json!({
                            "athlete_id": request.athlete_id,
                            "channel": request.channel,
                            "message_id": message_id,
                        }),
                    ),
                    now,
                )?;
                tx.commit()?;
                Ok((message_id, outbox_id))
            })
            .await?;
        Ok(ids)
    }

    /// Claim up to `limit` due `pending` entries for this dispatcher.
    ///
    /// Each claim is a guarded UPDATE, so two dispatchers racing for the same
    /// entry cannot both win it. The claim counts as an attempt: a dispatcher
    /// that dies mid-send still used one up. An entry that already used
    /// `max_attempts` claims is dead-lettered here instead of being claimed
    /// again.
    pub async fn claim_due_outbox(
        &self,
        now: DateTime<Utc>,
        lease: chrono::Duration,
        limit: usize,
        max_attempts: u32,
    ) -> Result<ClaimBatch, AppError> {
        let batch = self
            .conn
            .call(move |conn| -> Result<ClaimBatch, rusqlite::Error> {
                let tx = conn.transaction()?;
                let ts = format_db_timestamp(now);
                let locked_until = format_db_timestamp(now + lease);

                let candidates: Vec<(i64, u32)> = {
                    let mut stmt = tx.prepare(
                        "SELECT id, attempts FROM outbox
                         WHERE status = 'pending'
                           AND next_attempt_at <= ?1
                           AND (locked_until IS NULL OR locked_until <= ?1)
                         ORDER BY next_attempt_at ASC, id ASC
                         LIMIT ?2",
                    )?;
                    let rows = stmt.query_map(params![ts, limit as i64], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?;
                    rows.collect::<Result<_, _>>()?
                };

                let mut batch = ClaimBatch::default();
                for (id, attempts) in candidates {
                    if attempts >= max_attempts {
                        let error = "attempts exhausted without a recorded result";
                        let changed = tx.execute(
                            "UPDATE outbox SET status = 'dead', last_error = ?1,
                                 locked_until = NULL, claim_token = NULL, updated_at = ?2
                             WHERE id = ?3 AND status = 'pending'",
                            params![error, ts, id],
                        )?;
                        if changed == 1 {
                            insert_audit(
                                &tx,
                                &AuditRecord::new(SYSTEM_ACTOR, "outbox.dead", "outbox", id)
                                    .with_detail(json!({ "attempts": attempts, "error": error })),
                                now,
                            )?;
                            batch.exhausted.push(id);
                        }
                        continue;
                    }

                    let token = uuid::Uuid::new_v4().to_string();
                    let changed = tx.execute(
                        "UPDATE outbox SET attempts = attempts + 1, locked_until = ?1,
                             claim_token = ?2, updated_at = ?3
                         WHERE id = ?4
                           AND status = 'pending'
                           AND next_attempt_at <= ?3
                           AND (locked_until IS NULL OR locked_until <= ?3)",
                        params![locked_until, token, ts, id],
                    )?;
                    if changed == 1 {
                        batch.claimed.push(tx.query_row(
                            &format!("SELECT {} FROM outbox WHERE id = ?1", OUTBOX_COLUMNS),
                            params![id],
                            outbox_from_row,
                        )?);
                    }
                }
                tx.commit()?;
                Ok(batch)
            })
            .await?;
        Ok(batch)
    }

    /// Mark a claimed entry delivered. Returns false if the claim was lost.
    pub async fn mark_outbox_sent(
        &self,
        id: i64,
        claim_token: String,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let applied = self
            .conn
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let tx = conn.transaction()?;
                let ts = format_db_timestamp(now);
                let attempts: Option<u32> = tx
                    .query_row(
                        "UPDATE outbox SET status = 'sent', sent_at = ?1, last_error = NULL,
                             locked_until = NULL, claim_token = NULL, updated_at = ?1
                         WHERE id = ?2 AND claim_token = ?3 AND status = 'pending'
                         RETURNING attempts",
                        params![ts, id, claim_token],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(attempts) = attempts else {
                    return Ok(false);
                };
                insert_audit(
                    &tx,
                    &AuditRecord::new(SYSTEM_ACTOR, "outbox.sent", "outbox", id)
                        .with_detail(json!({ "attempts": attempts })),
                    now,
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;
        Ok(applied)
    }

    /// Record a retryable failure and put the entry back in `pending`,
    /// due again at `next_attempt_at`.
    pub async fn mark_outbox_retry(
        &self,
        id: i64,
        claim_token: String,
        next_attempt_at: DateTime<Utc>,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let applied = self
            .conn
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let tx = conn.transaction()?;
                let next_at = format_db_timestamp(next_attempt_at);
                let attempts: Option<u32> = tx
                    .query_row(
                        "UPDATE outbox SET status = 'pending', next_attempt_at = ?1,
                             last_error = ?2, locked_until = NULL, claim_token = NULL,
                             updated_at = ?3
                         WHERE id = ?4 AND claim_token = ?5 AND status = 'pending'
                         RETURNING attempts",
                        params![next_at, error, format_db_timestamp(now), id, claim_token],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(attempts) = attempts else {
                    return Ok(false);
                };
                insert_audit(
                    &tx,
                    &AuditRecord::new(SYSTEM_ACTOR, "outbox.failed", "outbox", id).with_detail(
                        json!({
                            "attempts": attempts,
                            "error": error,
                            "next_attempt_at": next_at,
                        }),
                    ),
                    now,
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;
        Ok(applied)
    }

    /// Dead-letter a claimed entry and raise it to the audit log.
    pub async fn mark_outbox_dead(
        &self,
        id: i64,
        claim_token: String,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let applied = self
            .conn
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let tx = conn.transaction()?;
                let ts = format_db_timestamp(now);
                let attempts: Option<u32> = tx
                    .query_row(
                        "UPDATE outbox SET status = 'dead', last_error = ?1,
                             locked_until = NULL, claim_token = NULL, updated_at = ?2
                         WHERE id = ?3 AND claim_token = ?4 AND status = 'pending'
                         RETURNING attempts",
                        params![error, ts, id, claim_token],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(attempts) = attempts else {
                    return Ok(false);
                };
                insert_audit(
                    &tx,
                    &AuditRecord::new(SYSTEM_ACTOR, "outbox.dead", "outbox", id)
                        .with_detail(json!({ "attempts": attempts, "error": error })),
                    now,
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;
        Ok(applied)
    }

    pub async fn get_outbox_entry(&self, id: i64) -> Result<Option<OutboxEntry>, AppError> {
        let entry = self
            .conn
            .call(move |conn| -> Result<Option<OutboxEntry>, rusqlite::Error> {
                conn.query_row(
                    &format!("SELECT {} FROM outbox WHERE id = ?1", OUTBOX_COLUMNS),
                    params![id],
                    outbox_from_row,
                )
                .optional()
            })
            .await?;
        Ok(entry)
    }

    /// Entries, newest first, optionally filtered by status.
    pub async fn list_outbox(
        &self,
        status: Option<OutboxStatus>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, AppError> {
        let status = status.map(|s| s.to_string());
        let entries = self
            .conn
            .call(move |conn| -> Result<Vec<OutboxEntry>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM outbox
                     WHERE (?1 IS NULL OR status = ?1)
                     ORDER BY updated_at DESC, id DESC
                     LIMIT ?2",
                    OUTBOX_COLUMNS
                ))?;
                let rows = stmt.query_map(params![status, limit as i64], outbox_from_row)?;
                rows.collect()
            })
            .await?;
        Ok(entries)
    }
}
