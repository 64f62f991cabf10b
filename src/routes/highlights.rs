// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Highlight review surface.
//!
//! Review decisions are not locked: an accepted highlight may later be
//! rejected (and vice versa). Every change is a separate audit entry.

use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::models::{
    Highlight, HighlightCategory, HighlightOrigin, HighlightStatus, HighlightUpdate, NewHighlight,
};
use crate::AppState;
use axum::{
    extract::{Extension, Json, Path, Query, State},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        // GET takes an athlete id, PATCH and DELETE a highlight id
        .route(
            "/highlights/{id}",
            get(list_highlights)
                .patch(update_highlight)
                .delete(delete_highlight),
        )
        .route("/highlights/bulk", post(bulk_update))
        .route("/athletes/{id}/highlights", post(create_highlight))
}

#[derive(Deserialize)]
struct ListParams {
    status: Option<HighlightStatus>,
    source: Option<HighlightOrigin>,
}

async fn list_highlights(
    State(state): State<Arc<AppState>>,
    Path(athlete_id): Path<i64>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Highlight>>, AppError> {
    if state.db.get_athlete(athlete_id).await?.is_none() {
        return Err(AppError::NotFound(format!("athlete {}", athlete_id)));
    }
    let highlights = state
        .db
        .list_highlights(athlete_id, params.status, params.source)
        .await?;
    Ok(Json(highlights))
}

#[derive(Deserialize, Validate)]
struct UpdateRequest {
    status: Option<HighlightStatus>,
    #[validate(length(min = 1, max = 500))]
    text: Option<String>,
    category: Option<HighlightCategory>,
    pinned: Option<bool>,
    #[validate(length(min = 1, max = 200))]
    reviewed_by: Option<String>,
}

async fn update_highlight(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<Highlight>, AppError> {
    request.validate()?;
    if request.status.is_none()
        && request.text.is_none()
        && request.category.is_none()
        && request.pinned.is_none()
    {
        return Err(AppError::BadRequest("nothing to update".to_string()));
    }

    let update = HighlightUpdate {
        status: request.status,
        text: request.text.map(|t| t.trim().to_string()),
        category: request.category,
        pinned: request.pinned,
        reviewed_by: request.reviewed_by,
    };
    let highlight = state
        .db
        .update_highlight(id, update, user.coach_id, Utc::now())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("highlight {}", id)))?;
    tracing::info!(highlight_id = id, status = %highlight.status, "Highlight updated");
    Ok(Json(highlight))
}

#[derive(Deserialize, Validate)]
struct BulkRequest {
    #[validate(length(min = 1, max = 200))]
    highlight_ids: Vec<i64>,
    status: HighlightStatus,
    #[validate(length(min = 1, max = 200))]
    reviewed_by: Option<String>,
}

#[derive(Serialize)]
struct BulkResponse {
    updated: Vec<Highlight>,
    missing: Vec<i64>,
}

async fn bulk_update(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<BulkRequest>,
) -> Result<Json<BulkResponse>, AppError> {
    request.validate()?;
    let mut ids = request.highlight_ids;
    ids.sort_unstable();
    ids.dedup();

    let (updated, missing) = state
        .db
        .bulk_update_highlight_status(
            ids,
            request.status,
            request.reviewed_by,
            user.coach_id,
            Utc::now(),
        )
        .await?;
    tracing::info!(
        updated = updated.len(),
        missing = missing.len(),
        status = %request.status,
        "Bulk highlight review"
    );
    Ok(Json(BulkResponse { updated, missing }))
}

#[derive(Deserialize, Validate)]
struct CreateRequest {
    #[validate(length(min = 1, max = 500))]
    text: String,
    #[serde(default)]
    category: Option<HighlightCategory>,
    #[serde(default)]
    pinned: bool,
    #[serde(default)]
    source_message_id: Option<i64>,
}

/// Coach-authored highlight; starts out accepted.
async fn create_highlight(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(athlete_id): Path<i64>,
    Json(request): Json<CreateRequest>,
) -> Result<Json<Highlight>, AppError> {
    request.validate()?;
    let text = request.text.trim().to_string();
    if text.is_empty() {
        return Err(AppError::BadRequest("text is empty".to_string()));
    }
    if state.db.get_athlete(athlete_id).await?.is_none() {
        return Err(AppError::NotFound(format!("athlete {}", athlete_id)));
    }
    if let Some(message_id) = request.source_message_id {
        let message = state
            .db
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("message {}", message_id)))?;
        if message.athlete_id != Some(athlete_id) {
            return Err(AppError::BadRequest(format!(
                "message {} does not belong to athlete {}",
                message_id, athlete_id
            )));
        }
    }

    let highlight = state
        .db
        .insert_highlight(
            NewHighlight {
                athlete_id,
                source_message_id: request.source_message_id,
                text,
                category: request.category.unwrap_or(HighlightCategory::General),
                origin: HighlightOrigin::Manual,
                score: 1.0,
                pinned: request.pinned,
            },
            user.coach_id,
            Utc::now(),
        )
        .await?;
    Ok(Json(highlight))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn delete_highlight(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<DeleteResponse>, AppError> {
    if !state.db.delete_highlight(id, user.coach_id, Utc::now()).await? {
        return Err(AppError::NotFound(format!("highlight {}", id)));
    }
    Ok(Json(DeleteResponse { deleted: true }))
}
