// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Risk queries.

use crate::error::AppError;
use crate::models::{RiskAssessment, RiskLevel};
use crate::AppState;
use axum::{
    extract::{Json, Path, State},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/athletes/{id}/risk", get(get_risk))
        .route("/risk/recompute", post(recompute))
}

async fn get_risk(
    State(state): State<Arc<AppState>>,
    Path(athlete_id): Path<i64>,
) -> Result<Json<RiskAssessment>, AppError> {
    Ok(Json(state.risk.assess(athlete_id, Utc::now()).await?))
}

#[derive(Serialize)]
struct RecomputeResponse {
    assessed: usize,
    high: usize,
    medium: usize,
    low: usize,
}

async fn recompute(State(state): State<Arc<AppState>>) -> Result<Json<RecomputeResponse>, AppError> {
    let assessments = state.risk.recompute_all(Utc::now()).await?;
    let count = |level: RiskLevel| assessments.iter().filter(|a| a.level == level).count();
    let response = RecomputeResponse {
        assessed: assessments.len(),
        high: count(RiskLevel::High),
        medium: count(RiskLevel::Medium),
        low: count(RiskLevel::Low),
    };
    tracing::info!(
        assessed = response.assessed,
        high = response.high,
        "Risk sweep complete"
    );
    Ok(Json(response))
}
