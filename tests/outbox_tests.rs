// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outbound queue and dispatcher: delivery, retry with backoff, dead letters.

mod common;

use axum::http::StatusCode;
use chrono::{Duration, TimeZone, Utc};
use coach_inbox::channels::ChannelRegistry;
use coach_inbox::config::Config;
use coach_inbox::error::SendError;
use coach_inbox::models::{Channel, Direction, OutboxStatus};
use coach_inbox::services::{DispatchReport, Dispatcher};
use common::*;
use serde_json::json;
use std::sync::Arc;

async fn queue_whatsapp(app: &TestApp, config: &Config, text: &str) -> (i64, i64) {
    let athlete = seed_athlete(app.db(), "Ana", Some("+34600111222")).await;
    let response = app
        .call(authed_json(
            config,
            "POST",
            "/send/whatsapp",
            json!({ "athlete_id": athlete.id, "message": text }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "queued");
    (athlete.id, json["outbox_id"].as_i64().unwrap())
}

fn dispatcher_with(app: &TestApp, sender: Arc<RecordingSender>) -> Dispatcher {
    Dispatcher::new(
        app.db().clone(),
        ChannelRegistry::new().with(sender),
        app.state.config.dispatch.clone(),
    )
}

#[tokio::test]
async fn test_queued_message_is_delivered_once() {
    let config = Config::test_default();
    let app = create_test_app_with(config.clone()).await;
    let (athlete_id, outbox_id) = queue_whatsapp(&app, &config, "Mañana 8x400").await;

    let sender = Arc::new(RecordingSender::new(Channel::Whatsapp));
    let dispatcher = dispatcher_with(&app, sender.clone());

    let report = dispatcher.run_once(Utc::now()).await.unwrap();
    assert_eq!(
        report,
        DispatchReport {
            claimed: 1,
            sent: 1,
            ..Default::default()
        }
    );
    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "+34600111222");
    assert_eq!(sent[0].1.text, "Mañana 8x400");

    let entry = app.db().get_outbox_entry(outbox_id).await.unwrap().unwrap();
    assert_eq!(entry.status, OutboxStatus::Sent);
    assert_eq!(entry.attempts, 1);
    assert!(entry.sent_at.is_some());

    // Nothing left to claim
    let report = dispatcher.run_once(Utc::now()).await.unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(sender.attempts(), 1);

    let conversations = app.db().list_conversations(athlete_id).await.unwrap();
    let messages = app
        .db()
        .list_conversation_messages(conversations[0].id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].direction, Direction::Outbound);
}

#[tokio::test]
async fn test_retries_stop_at_max_attempts() {
    let config = Config::test_default();
    let app = create_test_app_with(config.clone()).await;
    let (_, outbox_id) = queue_whatsapp(&app, &config, "¿Cómo va la rodilla?").await;

    let sender = Arc::new(RecordingSender::new(Channel::Whatsapp));
    for _ in 0..6 {
        sender.push_result(Err(SendError::Retryable("timeout".into())));
    }
    let dispatcher = dispatcher_with(&app, sender.clone());
    let base_secs = config.dispatch.base_delay.as_secs() as i64;

    // Whole seconds, so millisecond storage does not shave the measured delay
    let start = Utc.timestamp_opt(Utc::now().timestamp(), 0).unwrap();
    let mut previous_next = None;
    for attempt in 1..=5u32 {
        let now = start + Duration::hours(2 * attempt as i64);
        let report = dispatcher.run_once(now).await.unwrap();
        assert_eq!(report.claimed, 1);

        let entry = app.db().get_outbox_entry(outbox_id).await.unwrap().unwrap();
        assert_eq!(entry.attempts, attempt);
        if attempt < 5 {
            assert_eq!(report.retried, 1);
            assert_eq!(entry.status, OutboxStatus::Pending);
            assert_eq!(entry.last_error.as_deref(), Some("retryable send failure: timeout"));
            let delay = (entry.next_attempt_at - now).num_seconds();
            assert!(delay >= base_secs << (attempt - 1), "attempt {} delay {}", attempt, delay);
            if let Some(prev) = previous_next {
                assert!(entry.next_attempt_at >= prev);
            }
            previous_next = Some(entry.next_attempt_at);
        } else {
            assert_eq!(report.dead, 1);
            assert_eq!(entry.status, OutboxStatus::Dead);
        }
    }

    let report = dispatcher
        .run_once(start + Duration::days(30))
        .await
        .unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(sender.attempts(), 5);

    let audit = app
        .db()
        .list_audit(Some("outbox".into()), Some(outbox_id.to_string()), 20)
        .await
        .unwrap();
    assert_eq!(audit.iter().filter(|e| e.action == "outbox.dead").count(), 1);
    assert_eq!(audit.iter().filter(|e| e.action == "outbox.failed").count(), 4);
}

#[tokio::test]
async fn test_rescheduled_entry_is_listed_as_pending() {
    let config = Config::test_default();
    let app = create_test_app_with(config.clone()).await;
    let (_, outbox_id) = queue_whatsapp(&app, &config, "Hola").await;

    let sender = Arc::new(RecordingSender::new(Channel::Whatsapp));
    sender.push_result(Err(SendError::Retryable("HTTP 503".into())));
    let dispatcher = dispatcher_with(&app, sender.clone());
    dispatcher.run_once(Utc::now()).await.unwrap();

    let pending = body_json(app.call(authed(&config, "GET", "/outbox?status=pending")).await).await;
    let pending = pending.as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["id"].as_i64().unwrap(), outbox_id);
    assert_eq!(pending[0]["attempts"], 1);
    assert_eq!(pending[0]["last_error"], "retryable send failure: HTTP 503");

    let failed = body_json(app.call(authed(&config, "GET", "/outbox?status=failed")).await).await;
    assert!(failed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unacknowledged_claims_still_reach_the_dead_letter() {
    let config = Config::test_default();
    let app = create_test_app_with(config.clone()).await;
    let (_, outbox_id) = queue_whatsapp(&app, &config, "Hola").await;

    let max_attempts = config.dispatch.max_attempts;
    let lease = chrono::Duration::from_std(config.dispatch.claim_lease).unwrap();
    let start = Utc::now();

    // Each claim is abandoned, as if the dispatcher died mid-send
    for n in 0..max_attempts {
        let now = start + lease * (2 * n as i32);
        let batch = app
            .db()
            .claim_due_outbox(now, lease, 10, max_attempts)
            .await
            .unwrap();
        assert_eq!(batch.claimed.len(), 1, "claim {}", n + 1);
        assert_eq!(batch.claimed[0].attempts, n + 1);
        assert!(batch.exhausted.is_empty());
    }

    let now = start + lease * (2 * max_attempts as i32);
    let batch = app
        .db()
        .claim_due_outbox(now, lease, 10, max_attempts)
        .await
        .unwrap();
    assert!(batch.claimed.is_empty());
    assert_eq!(batch.exhausted, vec![outbox_id]);

    let entry = app.db().get_outbox_entry(outbox_id).await.unwrap().unwrap();
    assert_eq!(entry.status, OutboxStatus::Dead);
    assert_eq!(entry.attempts, max_attempts);

    // Dead entries are never claimed again
    let later = app
        .db()
        .claim_due_outbox(now + chrono::Duration::days(1), lease, 10, max_attempts)
        .await
        .unwrap();
    assert!(later.claimed.is_empty() && later.exhausted.is_empty());

    let audit = app
        .db()
        .list_audit(Some("outbox".into()), Some(outbox_id.to_string()), 20)
        .await
        .unwrap();
    assert_eq!(audit.iter().filter(|e| e.action == "outbox.dead").count(), 1);
}

#[tokio::test]
async fn test_entry_is_not_retried_before_its_time() {
    let config = Config::test_default();
    let app = create_test_app_with(config.clone()).await;
    let (_, outbox_id) = queue_whatsapp(&app, &config, "Hola").await;

    let sender = Arc::new(RecordingSender::new(Channel::Whatsapp));
    sender.push_result(Err(SendError::Retryable("HTTP 503".into())));
    let dispatcher = dispatcher_with(&app, sender.clone());

    let now = Utc::now();
    dispatcher.run_once(now).await.unwrap();
    let report = dispatcher
        .run_once(now + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(report.claimed, 0);

    let entry = app.db().get_outbox_entry(outbox_id).await.unwrap().unwrap();
    let report = dispatcher.run_once(entry.next_attempt_at).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(sender.attempts(), 2);
}

#[tokio::test]
async fn test_permanent_failure_goes_dead_immediately() {
    let config = Config::test_default();
    let app = create_test_app_with(config.clone()).await;
    let (_, outbox_id) = queue_whatsapp(&app, &config, "Hola").await;

    let sender = Arc::new(RecordingSender::new(Channel::Whatsapp));
    sender.push_result(Err(SendError::Permanent("HTTP 400: invalid recipient".into())));
    let dispatcher = dispatcher_with(&app, sender.clone());

    let report = dispatcher.run_once(Utc::now()).await.unwrap();
    assert_eq!(report.dead, 1);

    let dead = body_json(app.call(authed(&config, "GET", "/outbox?status=dead")).await).await;
    assert_eq!(dead.as_array().unwrap().len(), 1);
    assert_eq!(dead[0]["id"].as_i64().unwrap(), outbox_id);
    assert_eq!(dead[0]["attempts"], 1);
}

#[tokio::test]
async fn test_concurrent_dispatchers_attempt_each_entry_once() {
    let config = Config::test_default();
    let app = create_test_app_with(config.clone()).await;
    queue_whatsapp(&app, &config, "Hola").await;

    let sender = Arc::new(RecordingSender::new(Channel::Whatsapp));
    let a = dispatcher_with(&app, sender.clone());
    let b = dispatcher_with(&app, sender.clone());

    let now = Utc::now();
    let (ra, rb) = tokio::join!(a.run_once(now), b.run_once(now));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_eq!(ra.claimed + rb.claimed, 1);
    assert_eq!(sender.attempts(), 1);
}

#[tokio::test]
async fn test_send_validation() {
    let config = Config::test_default();
    let app = create_test_app_with(config.clone()).await;
    let athlete = seed_athlete(app.db(), "Ana", Some("+34600111222")).await;

    let cases = [
        ("/send/manual", json!({ "athlete_id": athlete.id, "message": "Hola" }), StatusCode::BAD_REQUEST),
        ("/send/sms", json!({ "athlete_id": athlete.id, "message": "Hola" }), StatusCode::BAD_REQUEST),
        ("/send/telegram", json!({ "athlete_id": athlete.id, "message": "Hola" }), StatusCode::BAD_REQUEST),
        ("/send/whatsapp", json!({ "athlete_id": athlete.id, "message": "x".repeat(5000) }), StatusCode::BAD_REQUEST),
        ("/send/whatsapp", json!({ "athlete_id": 9999, "message": "Hola" }), StatusCode::NOT_FOUND),
    ];
    for (uri, body, expected) in cases {
        let response = app.call(authed_json(&config, "POST", uri, body)).await;
        assert_eq!(response.status(), expected, "{}", uri);
    }

    let outbox = body_json(app.call(authed(&config, "GET", "/outbox")).await).await;
    assert!(outbox.as_array().unwrap().is_empty());
}
