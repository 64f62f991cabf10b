// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Manual ingestion and the Action Orchestrator behind it.

mod common;

use axum::http::StatusCode;
use coach_inbox::config::Config;
use coach_inbox::error::CollaboratorError;
use coach_inbox::services::CompletionKind;
use common::*;
use serde_json::json;
use std::time::Duration;

const HIGHLIGHTS_JSON: &str =
    r#"{"highlights": [{"text": "Dolor en la rodilla", "category": "injury", "score": 0.9}]}"#;
const TODO_JSON: &str = r#"{"has_request": true, "title": "Revisar dolor de rodilla",
    "details": "Preguntar desde cuándo y ajustar la carga"}"#;

fn script_all(app: &TestApp) {
    app.completion
        .set(CompletionKind::Highlights, Script::Reply(HIGHLIGHTS_JSON.into()));
    app.completion.set(
        CompletionKind::Reply,
        Script::Reply("Siento lo de la rodilla. Hoy descanso y mañana lo vemos.".into()),
    );
    app.completion
        .set(CompletionKind::Todo, Script::Reply(TODO_JSON.into()));
}

#[tokio::test]
async fn test_manual_ingest_runs_all_actions() {
    let config = Config::test_default();
    let app = create_test_app_with(config.clone()).await;
    let athlete = seed_athlete(app.db(), "Ana", None).await;
    script_all(&app);

    let response = app
        .call(authed_json(
            &config,
            "POST",
            "/ingest/manual",
            json!({
                "athlete_id": athlete.id,
                "content_text": "Me duele la rodilla",
                "generate_highlights": true,
                "suggest_reply": true,
                "maybe_todo": true
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    let message_id = json["message_id"].as_i64().unwrap();

    let actions = &json["actions_performed"];
    let highlights = actions["highlights"].as_array().unwrap();
    assert!(!highlights.is_empty());
    assert_eq!(highlights[0]["category"], "injury");
    assert_eq!(highlights[0]["status"], "suggested");
    assert!(actions["suggested_reply"].as_str().unwrap().contains("rodilla"));
    assert_eq!(actions["todo"]["created_by"], "ai");
    assert_eq!(actions["todo"]["priority"], "P2");
    assert!(actions.get("errors").is_none());

    let message = app.db().get_message(message_id).await.unwrap().unwrap();
    assert_eq!(message.body, "Me duele la rodilla");
    assert_eq!(message.athlete_id, Some(athlete.id));

    let draft = body_json(
        app.call(authed(&config, "GET", &format!("/messages/{}/reply", message_id)))
            .await,
    )
    .await;
    assert_eq!(draft["message_id"].as_i64().unwrap(), message_id);
}

#[tokio::test]
async fn test_failing_action_does_not_affect_others() {
    let mut config = Config::test_default();
    config.enrichment.action_timeout = Duration::from_millis(100);
    let app = create_test_app_with(config.clone()).await;
    let athlete = seed_athlete(app.db(), "Ana", None).await;

    app.completion.set(
        CompletionKind::Highlights,
        Script::Fail(CollaboratorError::Http {
            status: 500,
            body: "boom".into(),
        }),
    );
    app.completion
        .set(CompletionKind::Reply, Script::Reply("Buen trabajo hoy.".into()));
    app.completion.set(
        CompletionKind::Todo,
        Script::Slow(Duration::from_secs(1), TODO_JSON.into()),
    );

    let json = body_json(
        app.call(authed_json(
            &config,
            "POST",
            "/ingest/manual",
            json!({
                "athlete_id": athlete.id,
                "content_text": "Terminé el rodaje",
                "generate_highlights": true,
                "suggest_reply": true,
                "maybe_todo": true
            }),
        ))
        .await,
    )
    .await;

    assert_eq!(json["status"], "success");
    let actions = &json["actions_performed"];
    assert_eq!(actions["suggested_reply"], "Buen trabajo hoy.");
    assert!(actions["errors"]["highlights"].is_string());
    assert!(actions["errors"]["todo"]
        .as_str()
        .unwrap()
        .contains("timed out"));
    assert!(actions["highlights"].as_array().unwrap().is_empty());

    let message_id = json["message_id"].as_i64().unwrap();
    assert!(app.db().get_message(message_id).await.unwrap().is_some());
    assert!(app.db().todos_for_message(message_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unrequested_actions_are_not_called() {
    let config = Config::test_default();
    let app = create_test_app_with(config.clone()).await;
    let athlete = seed_athlete(app.db(), "Ana", None).await;
    script_all(&app);

    let json = body_json(
        app.call(authed_json(
            &config,
            "POST",
            "/ingest/manual",
            json!({ "athlete_id": athlete.id, "content_text": "Solo guardar" }),
        ))
        .await,
    )
    .await;
    assert_eq!(json["status"], "success");
    assert_eq!(app.completion.calls(CompletionKind::Highlights), 0);
    assert_eq!(app.completion.calls(CompletionKind::Reply), 0);
    assert_eq!(app.completion.calls(CompletionKind::Todo), 0);
}

#[tokio::test]
async fn test_disabled_enrichment_skips_completion_calls() {
    let mut config = Config::test_default();
    config.enrichment.enabled = false;
    let app = create_test_app_with(config.clone()).await;
    let athlete = seed_athlete(app.db(), "Ana", None).await;
    script_all(&app);

    let json = body_json(
        app.call(authed_json(
            &config,
            "POST",
            "/ingest/manual",
            json!({
                "athlete_id": athlete.id,
                "content_text": "Me duele la rodilla",
                "generate_highlights": true,
                "maybe_todo": true
            }),
        ))
        .await,
    )
    .await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["actions_performed"]["disabled"], true);
    assert_eq!(app.completion.calls(CompletionKind::Highlights), 0);
}

#[tokio::test]
async fn test_repeated_manual_entry_is_duplicate() {
    let config = Config::test_default();
    let app = create_test_app_with(config.clone()).await;
    let athlete = seed_athlete(app.db(), "Ana", None).await;

    let body = json!({ "athlete_id": athlete.id, "content_text": "Hoy descanso" });
    let first = body_json(app.call(authed_json(&config, "POST", "/ingest/manual", body.clone())).await).await;
    let second = body_json(app.call(authed_json(&config, "POST", "/ingest/manual", body)).await).await;
    assert_eq!(first["status"], "success");
    assert_eq!(second["status"], "duplicate");
    assert_eq!(first["message_id"], second["message_id"]);
}

#[tokio::test]
async fn test_transcription_failure_keeps_message() {
    let config = Config::test_default();
    let app = create_test_app_with(config.clone()).await;
    let athlete = seed_athlete(app.db(), "Ana", None).await;
    app.transcriber
        .set(Err(CollaboratorError::Transport("connection refused".into())));

    let json = body_json(
        app.call(authed_json(
            &config,
            "POST",
            "/ingest/manual",
            json!({
                "athlete_id": athlete.id,
                "content_text": "Nota de voz adjunta",
                "content_audio_ref": "https://media.example.com/voice.ogg"
            }),
        ))
        .await,
    )
    .await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["transcription_failed"], true);

    let message = app
        .db()
        .get_message(json["message_id"].as_i64().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(message.transcription_failed);
    assert_eq!(message.body, "Nota de voz adjunta");
    assert_eq!(
        message.audio_ref.as_deref(),
        Some("https://media.example.com/voice.ogg")
    );
}

#[tokio::test]
async fn test_transcript_becomes_body() {
    let config = Config::test_default();
    let app = create_test_app_with(config.clone()).await;
    let athlete = seed_athlete(app.db(), "Ana", None).await;
    app.transcriber.set(Ok("  Hoy  me noto cansada ".into()));

    let json = body_json(
        app.call(authed_json(
            &config,
            "POST",
            "/ingest/manual",
            json!({
                "athlete_id": athlete.id,
                "content_audio_ref": "https://media.example.com/voice.ogg"
            }),
        ))
        .await,
    )
    .await;
    let message = app
        .db()
        .get_message(json["message_id"].as_i64().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.body, "Hoy me noto cansada");
    assert!(!message.transcription_failed);
}

#[tokio::test]
async fn test_manual_ingest_validation() {
    let config = Config::test_default();
    let app = create_test_app_with(config.clone()).await;

    let response = app
        .call(authed_json(
            &config,
            "POST",
            "/ingest/manual",
            json!({ "athlete_id": 999, "content_text": "Hola" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let athlete = seed_athlete(app.db(), "Ana", None).await;
    let response = app
        .call(authed_json(
            &config,
            "POST",
            "/ingest/manual",
            json!({ "athlete_id": athlete.id, "content_text": "   " }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
