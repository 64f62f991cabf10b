// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outbound intents.
//!
//! Sending never talks to a channel directly: it records the outbound message
//! and a `pending` outbox entry in one transaction and leaves delivery to the
//! [`Dispatcher`](super::dispatcher::Dispatcher).

use crate::channels::recipient_for;
use crate::db::{Database, OutboundRequest};
use crate::error::AppError;
use crate::models::{Channel, OutboxPayload};
use chrono::{DateTime, Utc};

/// A coach's request to send text to an athlete.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub athlete_id: i64,
    pub channel: Channel,
    pub text: String,
    /// Kept for email, dropped on other channels
    pub subject: Option<String>,
    pub reply_to_message_id: Option<i64>,
}

/// Ids created by a successful enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Queued {
    pub message_id: i64,
    pub outbox_id: i64,
}

pub struct Outbox {
    db: Database,
    conversation_idle: chrono::Duration,
}

impl Outbox {
    pub fn new(db: Database, conversation_idle: chrono::Duration) -> Self {
        Self {
            db,
            conversation_idle,
        }
    }

    pub async fn enqueue(
        &self,
        request: SendRequest,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Queued, AppError> {
        if request.channel == Channel::Manual {
            return Err(AppError::BadRequest(
                "the manual channel cannot send messages".to_string(),
            ));
        }

        let text = request.text.trim().to_string();
        if text.is_empty() {
            return Err(AppError::BadRequest("message is empty".to_string()));
        }
        let limit = request.channel.message_limit();
        if text.chars().count() > limit {
            return Err(AppError::BadRequest(format!(
                "message exceeds the {} limit of {} characters",
                request.channel, limit
            )));
        }

        let athlete = self
            .db
            .get_athlete(request.athlete_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("athlete {}", request.athlete_id)))?;
        let recipient = recipient_for(request.channel, &athlete).ok_or_else(|| {
            AppError::BadRequest(format!(
                "athlete {} has no {} contact",
                athlete.id, request.channel
            ))
        })?;

        if let Some(reply_to) = request.reply_to_message_id {
            let original = self
                .db
                .get_message(reply_to)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("message {}", reply_to)))?;
            if original.athlete_id != Some(athlete.id) {
                return Err(AppError::BadRequest(format!(
                    "message {} does not belong to athlete {}",
                    reply_to, athlete.id
                )));
            }
        }

        let (message_id, outbox_id) = self
            .db
            .enqueue_outbound(
                OutboundRequest {
                    athlete_id: athlete.id,
                    channel: request.channel,
                    recipient,
                    payload: OutboxPayload {
                        text,
                        subject: request
                            .subject
                            .filter(|s| request.channel == Channel::Email && !s.trim().is_empty()),
                        reply_to_message_id: request.reply_to_message_id,
                    },
                },
                now - self.conversation_idle,
                actor.to_string(),
                now,
            )
            .await?;

        tracing::info!(
            outbox_id,
            message_id,
            athlete_id = athlete.id,
            channel = %request.channel,
            "Outbound message queued"
        );
        Ok(Queued {
            message_id,
            outbox_id,
        })
    }
}
