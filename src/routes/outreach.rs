// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Check-in drafts for athletes the risk engine flags.

use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::models::{Channel, OutreachDraft, RiskLevel};
use crate::services::{OutreachBatch, SendRequest};
use crate::AppState;
use axum::{
    extract::{Extension, Json, Path, State},
    routing::post,
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_CHANNELS: [Channel; 3] = [Channel::Whatsapp, Channel::Telegram, Channel::Email];

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/outreach/generate", post(generate_for_at_risk))
        .route("/outreach/generate/{athlete_id}", post(generate_for_athlete))
}

fn requested_channels(channels: Option<Vec<Channel>>) -> Result<Vec<Channel>, AppError> {
    match channels {
        None => Ok(DEFAULT_CHANNELS.to_vec()),
        Some(list) if list.is_empty() => {
            Err(AppError::BadRequest("channels must not be empty".to_string()))
        }
        Some(list) => Ok(list),
    }
}

#[derive(Deserialize)]
struct AthleteBody {
    #[serde(default)]
    channels: Option<Vec<Channel>>,
    /// Queue the draft for this channel right away
    #[serde(default)]
    send: Option<Channel>,
}

#[derive(Serialize)]
struct QueuedDraft {
    channel: Channel,
    outbox_id: i64,
    message_id: i64,
}

#[derive(Serialize)]
struct AthleteResponse {
    #[serde(flatten)]
    draft: OutreachDraft,
    #[serde(skip_serializing_if = "Option::is_none")]
    queued: Option<QueuedDraft>,
}

async fn generate_for_athlete(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(athlete_id): Path<i64>,
    Json(body): Json<AthleteBody>,
) -> Result<Json<AthleteResponse>, AppError> {
    let mut channels = requested_channels(body.channels)?;
    if let Some(send) = body.send {
        if !channels.contains(&send) {
            channels.push(send);
        }
    }

    let now = Utc::now();
    let draft = state
        .orchestrator
        .draft_outreach(athlete_id, &channels, &user.coach_id, now)
        .await?;

    let queued = match body.send {
        Some(channel) => {
            let text = draft.for_channel(channel).ok_or_else(|| {
                AppError::BadRequest(format!(
                    "athlete {} has no {} contact",
                    athlete_id, channel
                ))
            })?;
            let queued = state
                .outbox
                .enqueue(
                    SendRequest {
                        athlete_id,
                        channel,
                        text: text.text.clone(),
                        subject: text.subject.clone(),
                        reply_to_message_id: None,
                    },
                    &user.coach_id,
                    now,
                )
                .await?;
            Some(QueuedDraft {
                channel,
                outbox_id: queued.outbox_id,
                message_id: queued.message_id,
            })
        }
        None => None,
    };

    Ok(Json(AthleteResponse { draft, queued }))
}

#[derive(Deserialize)]
struct SweepBody {
    #[serde(default)]
    channels: Option<Vec<Channel>>,
    #[serde(default)]
    min_level: Option<RiskLevel>,
}

async fn generate_for_at_risk(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<SweepBody>,
) -> Result<Json<OutreachBatch>, AppError> {
    let channels = requested_channels(body.channels)?;
    let batch = state
        .orchestrator
        .draft_outreach_for_at_risk(
            body.min_level.unwrap_or(RiskLevel::Medium),
            &channels,
            &user.coach_id,
            Utc::now(),
        )
        .await?;
    Ok(Json(batch))
}
