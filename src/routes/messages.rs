// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Conversation history, unmatched triage and on-demand enrichment.

use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::models::{Conversation, Highlight, Message, ReplyDraft, Todo};
use crate::AppState;
use axum::{
    extract::{Extension, Json, Path, Query, State},
    routing::{get, patch, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

const DEFAULT_UNMATCHED_LIMIT: usize = 50;
const MAX_UNMATCHED_LIMIT: usize = 500;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/messages/unmatched", get(list_unmatched))
        .route("/messages/{id}", patch(edit_message).delete(delete_message))
        .route("/messages/{id}/link", post(link_message))
        .route("/messages/{id}/reply", get(get_reply))
        .route("/messages/{id}/reply/suggest", post(suggest_reply))
        .route("/messages/{id}/todo", post(detect_todo))
        .route("/messages/{id}/highlights/generate", post(generate_highlights))
        .route("/athletes/{id}/conversations", get(list_conversations))
        .route("/conversations/{id}/messages", get(conversation_messages))
}

async fn load_message(state: &AppState, id: i64) -> Result<Message, AppError> {
    state
        .db
        .get_message(id)
        .await?
        .filter(|m| m.deleted_at.is_none())
        .ok_or_else(|| AppError::NotFound(format!("message {}", id)))
}

#[derive(Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

async fn list_unmatched(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<Message>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_UNMATCHED_LIMIT)
        .clamp(1, MAX_UNMATCHED_LIMIT);
    Ok(Json(state.db.list_unmatched(limit).await?))
}

#[derive(Deserialize, Validate)]
struct LinkRequest {
    #[validate(range(min = 1))]
    athlete_id: i64,
}

async fn link_message(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<LinkRequest>,
) -> Result<Json<Message>, AppError> {
    request.validate()?;
    let message = state
        .ingest
        .link_unmatched(id, request.athlete_id, &user.coach_id, Utc::now())
        .await?;
    Ok(Json(message))
}

#[derive(Deserialize, Validate)]
struct EditRequest {
    #[validate(length(min = 1, max = 10000))]
    body: String,
}

async fn edit_message(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<EditRequest>,
) -> Result<Json<Message>, AppError> {
    request.validate()?;
    let body = request.body.trim().to_string();
    if body.is_empty() {
        return Err(AppError::BadRequest("body is empty".to_string()));
    }
    let message = state
        .db
        .edit_message_body(id, body, user.coach_id, Utc::now())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("message {}", id)))?;
    Ok(Json(message))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn delete_message(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<DeleteResponse>, AppError> {
    if !state
        .db
        .soft_delete_message(id, user.coach_id, Utc::now())
        .await?
    {
        return Err(AppError::NotFound(format!("message {}", id)));
    }
    Ok(Json(DeleteResponse { deleted: true }))
}

async fn get_reply(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ReplyDraft>, AppError> {
    let draft = state
        .db
        .get_reply_draft(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("reply draft for message {}", id)))?;
    Ok(Json(draft))
}

#[derive(Serialize)]
struct SuggestReplyResponse {
    message_id: i64,
    suggested_reply: String,
}

async fn suggest_reply(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<SuggestReplyResponse>, AppError> {
    let message = load_message(&state, id).await?;
    let suggested_reply = state.orchestrator.suggest_reply(&message).await?;
    Ok(Json(SuggestReplyResponse {
        message_id: id,
        suggested_reply,
    }))
}

#[derive(Serialize)]
struct TodoResponse {
    message_id: i64,
    todo: Option<Todo>,
}

async fn detect_todo(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<TodoResponse>, AppError> {
    let message = load_message(&state, id).await?;
    let todo = state
        .orchestrator
        .maybe_create_todo(&message, &user.coach_id)
        .await?;
    Ok(Json(TodoResponse {
        message_id: id,
        todo,
    }))
}

#[derive(Deserialize)]
struct GenerateParams {
    #[serde(default)]
    overwrite: bool,
}

#[derive(Serialize)]
struct HighlightsResponse {
    message_id: i64,
    highlights: Vec<Highlight>,
}

async fn generate_highlights(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Query(params): Query<GenerateParams>,
) -> Result<Json<HighlightsResponse>, AppError> {
    let message = load_message(&state, id).await?;
    let highlights = state
        .orchestrator
        .highlights_for_message(&message, params.overwrite, &user.coach_id)
        .await?;
    Ok(Json(HighlightsResponse {
        message_id: id,
        highlights,
    }))
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Path(athlete_id): Path<i64>,
) -> Result<Json<Vec<Conversation>>, AppError> {
    if state.db.get_athlete(athlete_id).await?.is_none() {
        return Err(AppError::NotFound(format!("athlete {}", athlete_id)));
    }
    Ok(Json(state.db.list_conversations(athlete_id).await?))
}

async fn conversation_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Message>>, AppError> {
    if state.db.get_conversation(id).await?.is_none() {
        return Err(AppError::NotFound(format!("conversation {}", id)));
    }
    Ok(Json(state.db.list_conversation_messages(id).await?))
}
