// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Inbound ingestion: channel webhooks and manual entry.
//!
//! Webhooks acknowledge with 200 as soon as the message is stored, even when
//! the payload is malformed (recorded in the audit log) or enrichment later
//! fails. Only a storage failure returns an error status, so the provider
//! retries and the retry deduplicates.

use crate::channels::manual::ManualIngestRequest;
use crate::channels::{email, secret_matches, telegram, whatsapp};
use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::models::{AuditRecord, Channel, RawEvent, StoreOutcome, SYSTEM_ACTOR};
use crate::services::{ActionSet, ActionsPerformed};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Extension, Json, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Webhook routes (public, authenticated per channel).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/webhook/whatsapp",
            axum::routing::get(verify_whatsapp).post(whatsapp_webhook),
        )
        .route("/webhook/telegram", post(telegram_webhook))
        .route("/webhook/email", post(email_webhook))
        .route("/ingest/whatsapp", post(whatsapp_webhook))
        .route("/ingest/telegram", post(telegram_webhook))
        .route("/ingest/email", post(email_webhook))
}

/// Manual ingestion (coach session required).
pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new().route("/ingest/manual", post(ingest_manual))
}

/// Per-message outcome in a webhook acknowledgement.
#[derive(Debug, Serialize)]
pub struct EventResult {
    pub status: &'static str,
    pub message_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub unmatched: bool,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// `success`, `duplicate`, `ignored` or `error`
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    pub results: Vec<EventResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookAck {
    fn ignored() -> Self {
        Self {
            status: "ignored",
            message_id: None,
            results: Vec::new(),
            error: None,
        }
    }

    fn error(error: String) -> Self {
        Self {
            status: "error",
            message_id: None,
            results: Vec::new(),
            error: Some(error),
        }
    }

    fn from_results(results: Vec<EventResult>) -> Self {
        if results.is_empty() {
            return Self::ignored();
        }
        let status = if results.iter().all(|r| r.status == "duplicate") {
            "duplicate"
        } else {
            "success"
        };
        Self {
            status,
            message_id: results.first().map(|r| r.message_id),
            results,
            error: None,
        }
    }
}

/// Store each event and schedule background enrichment for new, matched
/// messages.
async fn ingest_events(
    state: &Arc<AppState>,
    events: Vec<RawEvent>,
) -> Result<WebhookAck, AppError> {
    let actions = ActionSet::for_webhooks(&state.config.enrichment);
    let mut results = Vec::with_capacity(events.len());

    for raw in events {
        let channel = raw.channel;
        let ingested = state.ingest.ingest(raw, Utc::now()).await.map_err(|e| {
            tracing::error!(channel = %channel, error = %e, "Failed to store webhook message");
            e
        })?;

        let unmatched = ingested.event.athlete_id.is_none();
        if let StoreOutcome::Created(message_id) = ingested.outcome {
            if !unmatched && !actions.is_empty() {
                spawn_enrichment(state.clone(), message_id, actions);
            }
        }
        results.push(EventResult {
            status: if ingested.outcome.is_duplicate() {
                "duplicate"
            } else {
                "success"
            },
            message_id: ingested.outcome.message_id(),
            external_id: ingested.event.external_id,
            unmatched,
        });
    }
    Ok(WebhookAck::from_results(results))
}

/// Run enrichment after the acknowledgement has been sent.
fn spawn_enrichment(state: Arc<AppState>, message_id: i64, actions: ActionSet) {
    tokio::spawn(async move {
        let message = match state.db.get_message(message_id).await {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(message_id, error = %e, "Failed to load message for enrichment");
                return;
            }
        };
        let performed = state.orchestrator.run(&message, actions, SYSTEM_ACTOR).await;
        tracing::debug!(
            message_id,
            highlights = performed.highlights.len(),
            reply = performed.suggested_reply.is_some(),
            todo = performed.todo.is_some(),
            errors = performed.errors.len(),
            "Background enrichment finished"
        );
    });
}

/// Record an unparseable payload and acknowledge it.
async fn malformed(state: &AppState, channel: Channel, error: String) -> WebhookAck {
    tracing::warn!(channel = %channel, error = %error, "Malformed webhook payload");
    let record = AuditRecord::new(SYSTEM_ACTOR, "webhook.malformed", "webhook", channel)
        .with_detail(json!({ "error": error }));
    if let Err(e) = state.db.append_audit(record, Utc::now()).await {
        tracing::error!(error = %e, "Failed to audit malformed payload");
    }
    WebhookAck::error(error)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// WhatsApp Cloud API verification handshake query.
#[derive(Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: String,
    #[serde(rename = "hub.challenge")]
    challenge: String,
    #[serde(rename = "hub.verify_token")]
    verify_token: String,
}

/// Echo the challenge when the verify token matches.
async fn verify_whatsapp(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    if params.mode == "subscribe"
        && secret_matches(&state.config.whatsapp.verify_token, Some(&params.verify_token))
    {
        tracing::info!("WhatsApp webhook subscription verified");
        (StatusCode::OK, params.challenge)
    } else {
        tracing::warn!(mode = %params.mode, "WhatsApp webhook verification failed");
        (StatusCode::FORBIDDEN, String::new())
    }
}

async fn whatsapp_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    if !whatsapp::verify_signature(
        &state.config.whatsapp.app_secret,
        &body,
        header(&headers, "x-hub-signature-256"),
    ) {
        tracing::warn!("Security Alert: WhatsApp webhook signature mismatch");
        return Err(AppError::Unauthorized);
    }

    let parsed = match whatsapp::parse_webhook(&body, Utc::now()) {
        Ok(parsed) => parsed,
        Err(e) => return Ok(Json(malformed(&state, Channel::Whatsapp, e.to_string()).await)),
    };
    if parsed.events.is_empty() {
        tracing::debug!(statuses = parsed.status_updates, "WhatsApp status callback ignored");
        return Ok(Json(WebhookAck::ignored()));
    }
    Ok(Json(ingest_events(&state, parsed.events).await?))
}

async fn telegram_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    if !secret_matches(
        &state.config.telegram.webhook_secret,
        header(&headers, telegram::SECRET_HEADER),
    ) {
        tracing::warn!("Security Alert: Telegram webhook secret mismatch");
        return Err(AppError::Unauthorized);
    }

    match telegram::parse_update(&body, Utc::now()) {
        Ok(Some(event)) => Ok(Json(ingest_events(&state, vec![event]).await?)),
        Ok(None) => Ok(Json(WebhookAck::ignored())),
        Err(e) => Ok(Json(malformed(&state, Channel::Telegram, e.to_string()).await)),
    }
}

async fn email_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    if !secret_matches(
        &state.config.email.inbound_token,
        header(&headers, email::TOKEN_HEADER),
    ) {
        tracing::warn!("Security Alert: email relay token mismatch");
        return Err(AppError::Unauthorized);
    }

    match email::parse_inbound(&body, Utc::now()) {
        Ok(event) => Ok(Json(ingest_events(&state, vec![event]).await?)),
        Err(e) => Ok(Json(malformed(&state, Channel::Email, e.to_string()).await)),
    }
}

#[derive(Debug, Serialize)]
pub struct ManualIngestResponse {
    /// `success` or `duplicate`
    pub status: &'static str,
    pub message_id: i64,
    pub transcription_failed: bool,
    pub actions_performed: ActionsPerformed,
}

/// Store a coach-entered message and run the requested actions inline.
async fn ingest_manual(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<ManualIngestRequest>,
) -> Result<Json<ManualIngestResponse>, AppError> {
    let athlete_id = request.athlete_id;
    let actions = request.actions();
    let now = Utc::now();
    let raw = request.into_raw_event(now)?;
    if state.db.get_athlete(athlete_id).await?.is_none() {
        return Err(AppError::NotFound(format!("athlete {}", athlete_id)));
    }

    let ingested = state.ingest.ingest(raw, now).await?;
    let message_id = ingested.outcome.message_id();
    if ingested.outcome.is_duplicate() {
        return Ok(Json(ManualIngestResponse {
            status: "duplicate",
            message_id,
            transcription_failed: ingested.event.transcription_failed,
            actions_performed: ActionsPerformed::default(),
        }));
    }

    let message = state
        .db
        .get_message(message_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("message {}", message_id)))?;
    let actions_performed = state.orchestrator.run(&message, actions, &user.coach_id).await;

    tracing::info!(
        athlete_id,
        message_id,
        coach_id = %user.coach_id,
        action_errors = actions_performed.errors.len(),
        "Manual message ingested"
    );
    Ok(Json(ManualIngestResponse {
        status: "success",
        message_id,
        transcription_failed: ingested.event.transcription_failed,
        actions_performed,
    }))
}
