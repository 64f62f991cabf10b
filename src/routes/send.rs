// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outbound send and delivery status.

use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::models::{Channel, OutboxEntry, OutboxStatus};
use crate::services::SendRequest;
use crate::AppState;
use axum::{
    extract::{Extension, Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/send/{channel}", post(send))
        .route("/outbox", get(list_outbox))
        .route("/outbox/{id}", get(get_outbox_entry))
}

#[derive(Deserialize, Validate)]
struct SendBody {
    #[validate(range(min = 1))]
    athlete_id: i64,
    #[validate(length(min = 1))]
    message: String,
    #[serde(default)]
    #[validate(length(max = 200))]
    subject: Option<String>,
    #[serde(default)]
    reply_to_message_id: Option<i64>,
}

#[derive(Serialize)]
struct SendResponse {
    status: &'static str,
    outbox_id: i64,
    message_id: i64,
}

/// Queue a message; delivery happens in the dispatcher.
async fn send(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(channel): Path<Channel>,
    Json(body): Json<SendBody>,
) -> Result<(StatusCode, Json<SendResponse>), AppError> {
    body.validate()?;
    let queued = state
        .outbox
        .enqueue(
            SendRequest {
                athlete_id: body.athlete_id,
                channel,
                text: body.message,
                subject: body.subject,
                reply_to_message_id: body.reply_to_message_id,
            },
            &user.coach_id,
            Utc::now(),
        )
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SendResponse {
            status: "queued",
            outbox_id: queued.outbox_id,
            message_id: queued.message_id,
        }),
    ))
}

async fn get_outbox_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<OutboxEntry>, AppError> {
    let entry = state
        .db
        .get_outbox_entry(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("outbox entry {}", id)))?;
    Ok(Json(entry))
}

#[derive(Deserialize)]
struct ListParams {
    status: Option<OutboxStatus>,
    limit: Option<usize>,
}

/// Outbox listing; `?status=dead` is the dead-letter view.
async fn list_outbox(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<OutboxEntry>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    Ok(Json(state.db.list_outbox(params.status, limit).await?))
}
