// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Check-in drafts for athletes flagged by the risk engine.

mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use coach_inbox::config::Config;
use coach_inbox::models::{
    Athlete, Channel, NewAthlete, NewTodo, RawEvent, RawSender, TodoCreator, TodoPriority,
};
use coach_inbox::services::CompletionKind;
use common::*;
use serde_json::json;

const OUTREACH_JSON: &str = r#"{
    "language": "es-ES",
    "email": {
        "subject": "¿Hablamos de tu plan?",
        "text": "Hola Ana, hace tiempo que no sé de ti. Reserva aquí: {{calendar}}"
    },
    "whatsapp": "Hola Ana, ¿cómo va la rodilla?",
    "telegram": "Hola Ana",
    "notes": {"tone": "cercano", "cta": "Responder", "reasoning": ["20 días sin contacto"]}
}"#;

fn outreach_config() -> Config {
    let mut config = Config::test_default();
    config.outreach.calendar_url = Some("https://cal.example.com/coach".to_string());
    config
}

async fn athlete_with_contacts(app: &TestApp, name: &str, phone: Option<&str>) -> Athlete {
    app.db()
        .insert_athlete(NewAthlete {
            name: name.to_string(),
            phone: phone.map(str::to_string),
            email: Some(format!("{}@example.com", name.to_lowercase())),
            ..Default::default()
        })
        .await
        .unwrap()
}

async fn message_days_ago(app: &TestApp, athlete_id: i64, text: &str, days: i64) {
    let now = Utc::now();
    app.state
        .ingest
        .ingest(
            RawEvent {
                channel: Channel::Manual,
                sender: RawSender::AthleteId(athlete_id),
                text: Some(text.to_string()),
                audio_ref: None,
                external_id: None,
                received_at: now - Duration::days(days),
            },
            now,
        )
        .await
        .unwrap();
}

async fn overdue_p1(app: &TestApp, athlete_id: i64) {
    app.db()
        .insert_todo(
            NewTodo {
                athlete_id,
                source_message_id: None,
                title: "Revisar plan".into(),
                details: String::new(),
                priority: TodoPriority::P1,
                due_at: Some(Utc::now() - Duration::days(3)),
                created_by: TodoCreator::Coach,
            },
            TEST_COACH.to_string(),
            Utc::now(),
        )
        .await
        .unwrap();
}

/// Silent for 20 days with two overdue P1 to-dos.
async fn silent_athlete(app: &TestApp, name: &str, phone: Option<&str>) -> Athlete {
    let athlete = athlete_with_contacts(app, name, phone).await;
    message_days_ago(app, athlete.id, "Me duele la rodilla", 20).await;
    overdue_p1(app, athlete.id).await;
    overdue_p1(app, athlete.id).await;
    athlete
}

#[tokio::test]
async fn test_outreach_drafts_one_message_per_reachable_channel() {
    let config = outreach_config();
    let app = create_test_app_with(config.clone()).await;
    let athlete = silent_athlete(&app, "Ana", Some("+34600111222")).await;
    app.completion
        .set(CompletionKind::Outreach, Script::Reply(OUTREACH_JSON.into()));

    let response = app
        .call(authed_json(
            &config,
            "POST",
            &format!("/outreach/generate/{}", athlete.id),
            json!({ "channels": ["whatsapp", "telegram", "email"] }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    assert_eq!(json["athlete_id"].as_i64().unwrap(), athlete.id);
    assert_eq!(json["risk_level"], "high");
    assert_eq!(json["language"], "es-ES");
    assert!(json.get("fallback").is_none());
    assert!(json.get("queued").is_none());

    // No Telegram handle, so no Telegram draft
    let drafts = json["drafts"].as_array().unwrap();
    assert_eq!(drafts.len(), 2);
    assert_eq!(drafts[0]["channel"], "whatsapp");
    assert_eq!(drafts[0]["text"], "Hola Ana, ¿cómo va la rodilla?");
    assert_eq!(drafts[1]["channel"], "email");
    assert_eq!(drafts[1]["subject"], "¿Hablamos de tu plan?");
    assert!(drafts[1]["text"]
        .as_str()
        .unwrap()
        .ends_with("https://cal.example.com/coach"));
    assert_eq!(json["notes"]["cta"], "Responder");

    let audit = body_json(
        app.call(authed(
            &config,
            "GET",
            &format!("/audit?resource_type=athlete&resource_id={}", athlete.id),
        ))
        .await,
    )
    .await;
    let entry = audit
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["action"] == "outreach.draft")
        .expect("outreach audit entry");
    assert_eq!(entry["actor"], TEST_COACH);
    assert_eq!(entry["detail"]["risk_level"], "high");
    assert_eq!(entry["detail"]["fallback"], false);
}

#[tokio::test]
async fn test_outreach_falls_back_to_stock_check_in() {
    let config = outreach_config();
    let app = create_test_app_with(config.clone()).await;
    let athlete = silent_athlete(&app, "Ana", Some("+34600111222")).await;
    app.completion.set(
        CompletionKind::Outreach,
        Script::Reply("Claro, aquí tienes unas ideas".into()),
    );

    let json = body_json(
        app.call(authed_json(
            &config,
            "POST",
            &format!("/outreach/generate/{}", athlete.id),
            json!({ "channels": ["whatsapp"] }),
        ))
        .await,
    )
    .await;
    assert_eq!(json["fallback"], true);
    assert_eq!(json["drafts"].as_array().unwrap().len(), 1);
    assert_eq!(json["drafts"][0]["text"], "Hola, ¿cómo va todo con el entrenamiento?");
    assert_eq!(app.completion.calls(CompletionKind::Outreach), 1);
}

#[tokio::test]
async fn test_outreach_draft_can_be_queued() {
    let config = outreach_config();
    let app = create_test_app_with(config.clone()).await;
    let athlete = silent_athlete(&app, "Ana", None).await;
    app.completion
        .set(CompletionKind::Outreach, Script::Reply(OUTREACH_JSON.into()));

    let json = body_json(
        app.call(authed_json(
            &config,
            "POST",
            &format!("/outreach/generate/{}", athlete.id),
            json!({ "channels": ["whatsapp"], "send": "email" }),
        ))
        .await,
    )
    .await;
    assert_eq!(json["queued"]["channel"], "email");
    let outbox_id = json["queued"]["outbox_id"].as_i64().unwrap();

    let entry = body_json(
        app.call(authed(&config, "GET", &format!("/outbox/{}", outbox_id)))
            .await,
    )
    .await;
    assert_eq!(entry["status"], "pending");
    assert_eq!(entry["recipient"], "ana@example.com");
    assert_eq!(entry["payload"]["subject"], "¿Hablamos de tu plan?");
    assert_eq!(entry["payload"]["text"], json["drafts"][0]["text"]);
}

#[tokio::test]
async fn test_outreach_rejects_unknown_or_unreachable_athletes() {
    let config = outreach_config();
    let app = create_test_app_with(config.clone()).await;
    let response = app
        .call(authed_json(&config, "POST", "/outreach/generate/9999", json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let athlete = seed_athlete(app.db(), "Luis", None).await;
    let response = app
        .call(authed_json(
            &config,
            "POST",
            &format!("/outreach/generate/{}", athlete.id),
            json!({}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.completion.calls(CompletionKind::Outreach), 0);
}

#[tokio::test]
async fn test_outreach_sweep_targets_flagged_athletes() {
    let config = outreach_config();
    let app = create_test_app_with(config.clone()).await;
    let ana = silent_athlete(&app, "Ana", Some("+34600111222")).await;
    let luis = seed_athlete(app.db(), "Luis", Some("+34600333444")).await;
    message_days_ago(&app, luis.id, "Todo genial, me siento fuerte", 0).await;
    // Never wrote and has no handle: flagged but unreachable
    let marta = seed_athlete(app.db(), "Marta", None).await;
    app.completion
        .set(CompletionKind::Outreach, Script::Reply(OUTREACH_JSON.into()));

    let json = body_json(
        app.call(authed_json(
            &config,
            "POST",
            "/outreach/generate",
            json!({ "channels": ["whatsapp"] }),
        ))
        .await,
    )
    .await;
    assert_eq!(json["assessed"], 3);
    let drafts = json["drafts"].as_array().unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0]["athlete_id"].as_i64().unwrap(), ana.id);
    assert!(json["skipped"].get(marta.id.to_string()).is_some());

    let json = body_json(
        app.call(authed_json(
            &config,
            "POST",
            "/outreach/generate",
            json!({ "channels": ["whatsapp"], "min_level": "low" }),
        ))
        .await,
    )
    .await;
    let mut drafted: Vec<i64> = json["drafts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["athlete_id"].as_i64().unwrap())
        .collect();
    drafted.sort_unstable();
    assert_eq!(drafted, vec![ana.id, luis.id]);
}
