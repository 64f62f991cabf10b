// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Conversations, stored messages and canonical inbound events.

use super::channel::{Channel, Direction, Identity, RawSender};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Thread of messages with one athlete on one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub athlete_id: i64,
    pub channel: Channel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    /// `None` while the sender is unresolved
    pub conversation_id: Option<i64>,
    pub athlete_id: Option<i64>,
    pub channel: Channel,
    pub direction: Direction,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    /// Canonical sender key, see [`Identity::key`]
    pub sender: String,
    /// `None` for outbound messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub transcription_failed: bool,
    pub unmatched: bool,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// What a channel adapter hands to the Normalizer.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub channel: Channel,
    pub sender: RawSender,
    pub text: Option<String>,
    pub audio_ref: Option<String>,
    pub external_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Canonical inbound event produced by the Normalizer.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub channel: Channel,
    pub sender_identity: Identity,
    /// Resolved athlete, `None` when unmatched
    pub athlete_id: Option<i64>,
    pub body_text: String,
    pub audio_ref: Option<String>,
    pub external_id: Option<String>,
    pub transcription_failed: bool,
    pub received_at: DateTime<Utc>,
}

/// Result of the insert-or-return-existing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Created(i64),
    Duplicate(i64),
}

impl StoreOutcome {
    pub fn message_id(self) -> i64 {
        match self {
            StoreOutcome::Created(id) | StoreOutcome::Duplicate(id) => id,
        }
    }

    pub fn is_duplicate(self) -> bool {
        matches!(self, StoreOutcome::Duplicate(_))
    }
}

/// Cached reply draft for a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyDraft {
    pub message_id: i64,
    pub channel: Channel,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
