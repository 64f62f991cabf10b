// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Coach-entered messages.

use crate::error::AppError;
use crate::models::{Channel, RawEvent, RawSender};
use crate::services::orchestrator::ActionSet;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use validator::Validate;

/// Manual ingestion form.
#[derive(Debug, Deserialize, Validate)]
pub struct ManualIngestRequest {
    #[validate(range(min = 1))]
    pub athlete_id: i64,
    #[serde(default)]
    #[validate(length(max = 10000))]
    pub content_text: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 2048))]
    pub content_audio_ref: Option<String>,
    /// Channel the conversation actually happened on (a coach transcribing a
    /// phone call, for example). Defaults to `manual`.
    #[serde(default)]
    pub source_channel: Option<Channel>,
    #[serde(default)]
    pub generate_highlights: bool,
    #[serde(default)]
    pub suggest_reply: bool,
    #[serde(default)]
    pub maybe_todo: bool,
}

impl ManualIngestRequest {
    pub fn actions(&self) -> ActionSet {
        ActionSet {
            generate_highlights: self.generate_highlights,
            suggest_reply: self.suggest_reply,
            maybe_create_todo: self.maybe_todo,
        }
    }

    /// Validate and convert into a raw event addressed to the athlete.
    pub fn into_raw_event(self, now: DateTime<Utc>) -> Result<RawEvent, AppError> {
        self.validate()?;
        let text = self.content_text.filter(|t| !t.trim().is_empty());
        if text.is_none() && self.content_audio_ref.is_none() {
            return Err(AppError::BadRequest(
                "content_text or content_audio_ref is required".to_string(),
            ));
        }
        Ok(RawEvent {
            channel: self.source_channel.unwrap_or(Channel::Manual),
            sender: RawSender::AthleteId(self.athlete_id),
            text,
            audio_ref: self.content_audio_ref,
            external_id: None,
            received_at: now,
        })
    }
}
