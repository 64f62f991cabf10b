// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Read-only audit log view.

use crate::error::AppError;
use crate::models::AuditEntry;
use crate::AppState;
use axum::{
    extract::{Json, Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_LIMIT: usize = 200;
const MAX_LIMIT: usize = 2000;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/audit", get(list_audit))
}

#[derive(Deserialize)]
struct AuditParams {
    resource_type: Option<String>,
    resource_id: Option<String>,
    limit: Option<usize>,
}

async fn list_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditParams>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let entries = state
        .db
        .list_audit(params.resource_type, params.resource_id, limit)
        .await?;
    Ok(Json(entries))
}
