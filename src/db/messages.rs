// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Messages, conversations and reply drafts.

use super::audit::insert_audit;
use super::{enum_col, is_unique_violation, opt_ts_col, ts_col, Database};
use crate::error::AppError;
use crate::models::{
    AuditRecord, Channel, Conversation, Message, MessageEvent, ReplyDraft, StoreOutcome,
};
use crate::time_utils::format_db_timestamp;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::json;

pub(crate) const MESSAGE_COLUMNS: &str = "id, conversation_id, athlete_id, channel, direction, \
     body, audio_ref, sender, fingerprint, external_id, transcription_failed, unmatched, \
     received_at, created_at, edited_at, deleted_at";

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        athlete_id: row.get(2)?,
        channel: enum_col(row, 3)?,
        direction: enum_col(row, 4)?,
        body: row.get(5)?,
        audio_ref: row.get(6)?,
        sender: row.get(7)?,
        fingerprint: row.get(8)?,
        external_id: row.get(9)?,
        transcription_failed: row.get(10)?,
        unmatched: row.get(11)?,
        received_at: ts_col(row, 12)?,
        created_at: ts_col(row, 13)?,
        edited_at: opt_ts_col(row, 14)?,
        deleted_at: opt_ts_col(row, 15)?,
    })
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        athlete_id: row.get(1)?,
        channel: enum_col(row, 2)?,
        created_at: ts_col(row, 3)?,
        updated_at: ts_col(row, 4)?,
    })
}

/// Everything needed for one atomic insert-or-return-existing step.
#[derive(Debug, Clone)]
pub struct InboundInsert {
    pub event: MessageEvent,
    /// Fingerprint stored on the new row
    pub fingerprint: String,
    /// Fingerprints that count as the same delivery (current and adjacent buckets)
    pub lookup_fingerprints: Vec<String>,
    /// Oldest `received_at` considered by the fingerprint lookup
    pub window_start: DateTime<Utc>,
    /// Conversations not updated since this instant are closed
    pub idle_cutoff: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

/// Look for a prior delivery of the same message.
fn find_existing(conn: &Connection, insert: &InboundInsert) -> rusqlite::Result<Option<i64>> {
    if let Some(external_id) = &insert.event.external_id {
        let existing = conn
            .query_row(
                "SELECT id FROM messages WHERE channel = ?1 AND external_id = ?2",
                params![insert.event.channel.to_string(), external_id],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(existing);
        }
    }

    let window_start = format_db_timestamp(insert.window_start);
    for fingerprint in &insert.lookup_fingerprints {
        let existing = conn
            .query_row(
                "SELECT id FROM messages WHERE fingerprint = ?1 AND received_at >= ?2",
                params![fingerprint, window_start],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(existing);
        }
    }
    Ok(None)
}

/// After a unique-constraint conflict, find the row that won.
fn find_conflicting(conn: &Connection, insert: &InboundInsert) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM messages
         WHERE fingerprint = ?1 OR (channel = ?2 AND external_id = ?3)
         ORDER BY id LIMIT 1",
        params![
            insert.fingerprint,
            insert.event.channel.to_string(),
            insert.event.external_id
        ],
        |row| row.get(0),
    )
    .optional()
}

/// Attach to the athlete's latest open conversation on `channel`, or open one.
pub(crate) fn attach_conversation(
    conn: &Connection,
    athlete_id: i64,
    channel: Channel,
    at: DateTime<Utc>,
    idle_cutoff: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    let at = format_db_timestamp(at);
    let open: Option<i64> = conn
        .query_row(
            "SELECT id FROM conversations
             WHERE athlete_id = ?1 AND channel = ?2 AND updated_at >= ?3
             ORDER BY updated_at DESC, id DESC
             LIMIT 1",
            params![athlete_id, channel.to_string(), format_db_timestamp(idle_cutoff)],
            |row| row.get(0),
        )
        .optional()?;

    match open {
        Some(id) => {
            conn.execute(
                "UPDATE conversations SET updated_at = MAX(updated_at, ?1) WHERE id = ?2",
                params![at, id],
            )?;
            Ok(id)
        }
        None => {
            conn.execute(
                "INSERT INTO conversations (athlete_id, channel, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![athlete_id, channel.to_string(), at],
            )?;
            let id = conn.last_insert_rowid();
            tracing::debug!(athlete_id, conversation_id = id, %channel, "Conversation opened");
            Ok(id)
        }
    }
}

impl Database {
    /// Insert an inbound message unless it is a redelivery.
    ///
    /// Runs in one transaction. A concurrent writer that wins the
    /// fingerprint or external-id constraint turns this call into a
    /// [`StoreOutcome::Duplicate`] of the winning row.
    pub async fn store_inbound(&self, insert: InboundInsert) -> Result<StoreOutcome, AppError> {
        let outcome = self
            .conn
            .call(move |conn| -> Result<StoreOutcome, rusqlite::Error> {
                let tx = conn.transaction()?;
                if let Some(id) = find_existing(&tx, &insert)? {
                    return Ok(StoreOutcome::Duplicate(id));
                }

                let event = &insert.event;
                let conversation_id = match event.athlete_id {
                    Some(athlete_id) => Some(attach_conversation(
                        &tx,
                        athlete_id,
                        event.channel,
                        event.received_at,
                        insert.idle_cutoff,
                    )?),
                    None => None,
                };

                let inserted = tx.execute(
                    "INSERT INTO messages (conversation_id, athlete_id, channel, direction, body,
                         audio_ref, sender, fingerprint, external_id, transcription_failed,
                         unmatched, received_at, created_at)
                     VALUES (?1, ?2, ?3, 'inbound', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        conversation_id,
                        event.athlete_id,
                        event.channel.to_string(),
                        event.body_text,
                        event.audio_ref,
                        event.sender_identity.key(),
                        insert.fingerprint,
                        event.external_id,
                        event.transcription_failed,
                        event.athlete_id.is_none(),
                        format_db_timestamp(event.received_at),
                        format_db_timestamp(insert.now),
                    ],
                );

                match inserted {
                    Ok(_) => {
                        let id = tx.last_insert_rowid();
                        tx.commit()?;
                        Ok(StoreOutcome::Created(id))
                    }
                    Err(e) if is_unique_violation(&e) => {
                        drop(tx);
                        match find_conflicting(conn, &insert)? {
                            Some(id) => Ok(StoreOutcome::Duplicate(id)),
                            None => Err(e),
                        }
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(outcome)
    }

    pub async fn get_message(&self, id: i64) -> Result<Option<Message>, AppError> {
        let message = self
            .conn
            .call(move |conn| -> Result<Option<Message>, rusqlite::Error> {
                conn.query_row(
                    &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                    params![id],
                    message_from_row,
                )
                .optional()
            })
            .await?;
        Ok(message)
    }

    /// Up to `limit` visible messages preceding `before_id` in the
    /// conversation, oldest first.
    pub async fn context_messages(
        &self,
        conversation_id: i64,
        before_id: i64,
        limit: usize,
    ) -> Result<Vec<Message>, AppError> {
        let mut messages = self
            .conn
            .call(move |conn| -> Result<Vec<Message>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE conversation_id = ?1 AND id != ?2 AND deleted_at IS NULL
                       AND (received_at, id) <= (SELECT received_at, id FROM messages WHERE id = ?2)
                     ORDER BY received_at DESC, id DESC
                     LIMIT ?3",
                    MESSAGE_COLUMNS
                ))?;
                let rows =
                    stmt.query_map(params![conversation_id, before_id, limit as i64], message_from_row)?;
                rows.collect()
            })
            .await?;
        messages.reverse();
        Ok(messages)
    }

    /// The athlete's latest `limit` visible messages across channels, oldest first.
    pub async fn recent_athlete_messages(
        &self,
        athlete_id: i64,
        limit: usize,
    ) -> Result<Vec<Message>, AppError> {
        let mut messages = self
            .conn
            .call(move |conn| -> Result<Vec<Message>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE athlete_id = ?1 AND deleted_at IS NULL
                     ORDER BY received_at DESC, id DESC
                     LIMIT ?2",
                    MESSAGE_COLUMNS
                ))?;
                let rows = stmt.query_map(params![athlete_id, limit as i64], message_from_row)?;
                rows.collect()
            })
            .await?;
        messages.reverse();
        Ok(messages)
    }

    /// Visible messages of a conversation in arrival order.
    pub async fn list_conversation_messages(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<Message>, AppError> {
        let messages = self
            .conn
            .call(move |conn| -> Result<Vec<Message>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE conversation_id = ?1 AND deleted_at IS NULL
                     ORDER BY received_at ASC, id ASC",
                    MESSAGE_COLUMNS
                ))?;
                let rows = stmt.query_map(params![conversation_id], message_from_row)?;
                rows.collect()
            })
            .await?;
        Ok(messages)
    }

    pub async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, AppError> {
        let conversation = self
            .conn
            .call(move |conn| -> Result<Option<Conversation>, rusqlite::Error> {
                conn.query_row(
                    "SELECT id, athlete_id, channel, created_at, updated_at
                     FROM conversations WHERE id = ?1",
                    params![id],
                    conversation_from_row,
                )
                .optional()
            })
            .await?;
        Ok(conversation)
    }

    /// Conversations of an athlete, most recently active first.
    pub async fn list_conversations(&self, athlete_id: i64) -> Result<Vec<Conversation>, AppError> {
        let conversations = self
            .conn
            .call(move |conn| -> Result<Vec<Conversation>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, athlete_id, channel, created_at, updated_at
                     FROM conversations
                     WHERE athlete_id = ?1
                     ORDER BY updated_at DESC, id DESC",
                )?;
                let rows = stmt.query_map(params![athlete_id], conversation_from_row)?;
                rows.collect()
            })
            .await?;
        Ok(conversations)
    }

    /// Messages whose sender could not be resolved, newest first.
    pub async fn list_unmatched(&self, limit: usize) -> Result<Vec<Message>, AppError> {
        let messages = self
            .conn
            .call(move |conn| -> Result<Vec<Message>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE unmatched = 1 AND deleted_at IS NULL
                     ORDER BY received_at DESC, id DESC
                     LIMIT ?1",
                    MESSAGE_COLUMNS
                ))?;
                let rows = stmt.query_map(params![limit as i64], message_from_row)?;
                rows.collect()
            })
            .await?;
        Ok(messages)
    }

    /// Attach an unmatched message to `athlete_id`.
    ///
    /// Returns `None` if the message does not exist or is already matched.
    pub async fn link_message(
        &self,
        message_id: i64,
        athlete_id: i64,
        idle_cutoff: DateTime<Utc>,
        actor: String,
        now: DateTime<Utc>,
    ) -> Result<Option<Message>, AppError> {
        let message = self
            .conn
            .call(move |conn| -> Result<Option<Message>, rusqlite::Error> {
                let tx = conn.transaction()?;
                let found: Option<(String, String, String)> = tx
                    .query_row(
                        "SELECT channel, received_at, sender FROM messages
                         WHERE id = ?1 AND unmatched = 1",
                        params![message_id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;
                let Some((channel, received_at, sender)) = found else {
                    return Ok(None);
                };
                let channel: Channel = channel.parse().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                let received_at = crate::time_utils::parse_rfc3339(&received_at).unwrap_or(now);

                let conversation_id =
                    attach_conversation(&tx, athlete_id, channel, received_at, idle_cutoff)?;
                tx.execute(
                    "UPDATE messages
                     SET athlete_id = ?1, conversation_id = ?2, unmatched = 0
                     WHERE id = ?3",
                    params![athlete_id, conversation_id, message_id],
                )?;
                insert_audit(
                    &tx,
                    &AuditRecord::new(actor, "message.link", "message", message_id).with_detail(
                        json!({
                            "athlete_id": athlete_id,
                            "conversation_id": conversation_id,
                            "sender": sender,
                        }),
                    ),
                    now,
                )?;
                let message = tx.query_row(
                    &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                    params![message_id],
                    message_from_row,
                )?;
                tx.commit()?;
                Ok(Some(message))
            })
            .await?;
        Ok(message)
    }

    /// Reviewer edit of a message body.
    pub async fn edit_message_body(
        &self,
        message_id: i64,
        body: String,
        actor: String,
        now: DateTime<Utc>,
    ) -> Result<Option<Message>, AppError> {
        let message = self
            .conn
            .call(move |conn| -> Result<Option<Message>, rusqlite::Error> {
                let tx = conn.transaction()?;
                let previous: Option<String> = tx
                    .query_row(
                        "SELECT body FROM messages WHERE id = ?1 AND deleted_at IS NULL",
                        params![message_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(previous) = previous else {
                    return Ok(None);
                };
                tx.execute(
                    "UPDATE messages SET body = ?1, edited_at = ?2 WHERE id = ?3",
                    params![body, format_db_timestamp(now), message_id],
                )?;
                insert_audit(
                    &tx,
                    &AuditRecord::new(actor, "message.edit", "message", message_id)
                        .with_detail(json!({ "previous_body": previous, "body": body })),
                    now,
                )?;
                let message = tx.query_row(
                    &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                    params![message_id],
                    message_from_row,
                )?;
                tx.commit()?;
                Ok(Some(message))
            })
            .await?;
        Ok(message)
    }

    /// Soft-delete a message. Returns false if it was missing or already deleted.
    pub async fn soft_delete_message(
        &self,
        message_id: i64,
        actor: String,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let deleted = self
            .conn
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let tx = conn.transaction()?;
                let changed = tx.execute(
                    "UPDATE messages SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                    params![format_db_timestamp(now), message_id],
                )?;
                if changed == 0 {
                    return Ok(false);
                }
                insert_audit(
                    &tx,
                    &AuditRecord::new(actor, "message.delete", "message", message_id),
                    now,
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;
        Ok(deleted)
    }

    /// Cache a reply draft, replacing any earlier draft for the message.
    pub async fn save_reply_draft(&self, draft: ReplyDraft) -> Result<(), AppError> {
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO reply_drafts (message_id, channel, text, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(message_id) DO UPDATE SET
                         channel = excluded.channel,
                         text = excluded.text,
                         created_at = excluded.created_at",
                    params![
                        draft.message_id,
                        draft.channel.to_string(),
                        draft.text,
                        format_db_timestamp(draft.created_at)
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_reply_draft(&self, message_id: i64) -> Result<Option<ReplyDraft>, AppError> {
        let draft = self
            .conn
            .call(move |conn| -> Result<Option<ReplyDraft>, rusqlite::Error> {
                conn.query_row(
                    "SELECT message_id, channel, text, created_at
                     FROM reply_drafts WHERE message_id = ?1",
                    params![message_id],
                    |row| {
                        Ok(ReplyDraft {
                            message_id: row.get(0)?,
                            channel: enum_col(row, 1)?,
                            text: row.get(2)?,
                            created_at: ts_col(row, 3)?,
                        })
                    },
                )
                .optional()
            })
            .await?;
        Ok(draft)
    }
}
