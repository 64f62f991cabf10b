// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Coach to-do board.

use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::models::{NewTodo, Todo, TodoCreator, TodoPriority, TodoStatus, TodoUpdate};
use crate::time_utils::parse_flexible_date;
use crate::AppState;
use axum::{
    extract::{Extension, Json, Path, Query, State},
    routing::{get, patch},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/athletes/{id}/todos", get(list_todos).post(create_todo))
        .route("/todos/{id}", patch(update_todo))
}

/// Distinguishes an absent field from an explicit `null`.
fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

fn parse_due(raw: &str) -> Result<DateTime<Utc>, AppError> {
    parse_flexible_date(raw)
        .ok_or_else(|| AppError::BadRequest(format!("invalid due_at: {}", raw)))
}

#[derive(Deserialize)]
struct ListParams {
    status: Option<TodoStatus>,
}

async fn list_todos(
    State(state): State<Arc<AppState>>,
    Path(athlete_id): Path<i64>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Todo>>, AppError> {
    if state.db.get_athlete(athlete_id).await?.is_none() {
        return Err(AppError::NotFound(format!("athlete {}", athlete_id)));
    }
    Ok(Json(state.db.list_todos(athlete_id, params.status).await?))
}

#[derive(Deserialize, Validate)]
struct CreateRequest {
    #[validate(length(min = 1, max = 200))]
    title: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    details: String,
    #[serde(default)]
    priority: Option<TodoPriority>,
    #[serde(default)]
    due_at: Option<String>,
    #[serde(default)]
    source_message_id: Option<i64>,
}

async fn create_todo(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(athlete_id): Path<i64>,
    Json(request): Json<CreateRequest>,
) -> Result<Json<Todo>, AppError> {
    request.validate()?;
    let title = request.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::BadRequest("title is empty".to_string()));
    }
    let due_at = request.due_at.as_deref().map(parse_due).transpose()?;
    if state.db.get_athlete(athlete_id).await?.is_none() {
        return Err(AppError::NotFound(format!("athlete {}", athlete_id)));
    }

    let todo = state
        .db
        .insert_todo(
            NewTodo {
                athlete_id,
                source_message_id: request.source_message_id,
                title,
                details: request.details.trim().to_string(),
                priority: request.priority.unwrap_or(TodoPriority::P2),
                due_at,
                created_by: TodoCreator::Coach,
            },
            user.coach_id,
            Utc::now(),
        )
        .await?;
    Ok(Json(todo))
}

#[derive(Deserialize, Validate)]
struct UpdateRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 200))]
    title: Option<String>,
    #[serde(default)]
    #[validate(length(max = 2000))]
    details: Option<String>,
    #[serde(default)]
    priority: Option<TodoPriority>,
    #[serde(default)]
    status: Option<TodoStatus>,
    #[serde(default, deserialize_with = "double_option")]
    due_at: Option<Option<String>>,
}

async fn update_todo(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<Todo>, AppError> {
    request.validate()?;
    let due_at = match request.due_at {
        Some(Some(raw)) => Some(Some(parse_due(&raw)?)),
        Some(None) => Some(None),
        None => None,
    };
    let update = TodoUpdate {
        title: request.title.map(|t| t.trim().to_string()),
        details: request.details,
        priority: request.priority,
        status: request.status,
        due_at,
    };
    if update.title.is_none()
        && update.details.is_none()
        && update.priority.is_none()
        && update.status.is_none()
        && update.due_at.is_none()
    {
        return Err(AppError::BadRequest("nothing to update".to_string()));
    }

    let todo = state
        .db
        .update_todo(id, update, user.coach_id, Utc::now())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("todo {}", id)))?;
    Ok(Json(todo))
}
