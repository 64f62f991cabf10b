// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook ingestion, deduplication and unmatched-sender handling.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{DateTime, Duration, Utc};
use coach_inbox::db::InboundInsert;
use coach_inbox::models::{Channel, Identity, MessageEvent, StoreOutcome};
use common::*;
use serde_json::json;
use std::collections::HashSet;

#[tokio::test]
async fn test_whatsapp_redelivery_is_deduplicated() {
    let config = config_without_webhook_enrichment();
    let app = create_test_app_with(config.clone()).await;
    let athlete = seed_athlete(app.db(), "Ana", Some("+34600111222")).await;

    let payload = whatsapp_text_payload("34600111222", "wamid.123", "Hoy 10k suaves", Utc::now().timestamp());

    let first = body_json(app.call(whatsapp_request(&config, payload.clone())).await).await;
    assert_eq!(first["status"], "success");
    assert_eq!(first["results"][0]["unmatched"], false);
    let message_id = first["message_id"].as_i64().unwrap();

    let response = app.call(whatsapp_request(&config, payload)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let second = body_json(response).await;
    assert_eq!(second["status"], "duplicate");
    assert_eq!(second["message_id"].as_i64().unwrap(), message_id);

    let conversations = app.db().list_conversations(athlete.id).await.unwrap();
    assert_eq!(conversations.len(), 1);
    let messages = app
        .db()
        .list_conversation_messages(conversations[0].id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn test_concurrent_redeliveries_store_one_message() {
    let config = config_without_webhook_enrichment();
    let app = create_test_app_with(config.clone()).await;
    let athlete = seed_athlete(app.db(), "Ana", Some("+34600111222")).await;

    let payload = whatsapp_text_payload(
        "34600111222",
        "wamid.race",
        "Voy a por el 10k",
        Utc::now().timestamp(),
    );
    let deliveries = 8;
    let responses = futures_util::future::join_all(
        (0..deliveries).map(|_| app.call(whatsapp_request(&config, payload.clone()))),
    )
    .await;

    let mut statuses = Vec::new();
    let mut ids = HashSet::new();
    for response in responses {
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        statuses.push(json["status"].as_str().unwrap().to_string());
        ids.insert(json["message_id"].as_i64().unwrap());
    }
    assert_eq!(statuses.iter().filter(|s| *s == "success").count(), 1);
    assert_eq!(
        statuses.iter().filter(|s| *s == "duplicate").count(),
        deliveries - 1
    );
    assert_eq!(ids.len(), 1);

    let conversations = app.db().list_conversations(athlete.id).await.unwrap();
    let messages = app
        .db()
        .list_conversation_messages(conversations[0].id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
}

fn manual_insert(
    athlete_id: i64,
    fingerprint: &str,
    received_at: DateTime<Utc>,
    window_start: DateTime<Utc>,
) -> InboundInsert {
    InboundInsert {
        event: MessageEvent {
            channel: Channel::Manual,
            sender_identity: Identity::Athlete { athlete_id },
            athlete_id: Some(athlete_id),
            body_text: "Me duele la rodilla".into(),
            audio_ref: None,
            external_id: None,
            transcription_failed: false,
            received_at,
        },
        fingerprint: fingerprint.to_string(),
        lookup_fingerprints: vec![fingerprint.to_string()],
        window_start,
        idle_cutoff: received_at - Duration::hours(72),
        now: received_at,
    }
}

#[tokio::test]
async fn test_fingerprint_conflict_falls_back_to_existing_row() {
    let app = create_test_app().await;
    let athlete = seed_athlete(app.db(), "Ana", None).await;
    let received_at = Utc::now() - Duration::days(3);

    let first = app
        .db()
        .store_inbound(manual_insert(
            athlete.id,
            "fp-rodilla",
            received_at,
            received_at - Duration::hours(24),
        ))
        .await
        .unwrap();
    let StoreOutcome::Created(id) = first else {
        panic!("expected a new row, got {:?}", first);
    };

    // The lookup window starts after the stored row, so only the unique
    // constraint can catch the second write
    let second = app
        .db()
        .store_inbound(manual_insert(
            athlete.id,
            "fp-rodilla",
            received_at,
            received_at + Duration::hours(1),
        ))
        .await
        .unwrap();
    assert_eq!(second, StoreOutcome::Duplicate(id));

    let conversations = app.db().list_conversations(athlete.id).await.unwrap();
    assert_eq!(conversations.len(), 1);
    let messages = app
        .db()
        .list_conversation_messages(conversations[0].id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn test_same_content_with_new_provider_id_deduplicates_by_fingerprint() {
    let config = config_without_webhook_enrichment();
    let app = create_test_app_with(config.clone()).await;
    seed_athlete(app.db(), "Ana", Some("+34600111222")).await;

    let ts = Utc::now().timestamp();
    let first = whatsapp_text_payload("34600111222", "wamid.A", "Llego tarde", ts);
    let retry = whatsapp_text_payload("34600111222", "wamid.B", "  llego   tarde ", ts + 3);

    let a = body_json(app.call(whatsapp_request(&config, first)).await).await;
    let b = body_json(app.call(whatsapp_request(&config, retry)).await).await;
    assert_eq!(a["status"], "success");
    assert_eq!(b["status"], "duplicate");
    assert_eq!(a["message_id"], b["message_id"]);
}

#[tokio::test]
async fn test_different_text_is_a_new_message() {
    let config = config_without_webhook_enrichment();
    let app = create_test_app_with(config.clone()).await;
    seed_athlete(app.db(), "Ana", Some("+34600111222")).await;

    let ts = Utc::now().timestamp();
    let a = body_json(
        app.call(whatsapp_request(
            &config,
            whatsapp_text_payload("34600111222", "wamid.1", "Primera", ts),
        ))
        .await,
    )
    .await;
    let b = body_json(
        app.call(whatsapp_request(
            &config,
            whatsapp_text_payload("34600111222", "wamid.2", "Segunda", ts),
        ))
        .await,
    )
    .await;
    assert_eq!(b["status"], "success");
    assert_ne!(a["message_id"], b["message_id"]);
}

#[tokio::test]
async fn test_whatsapp_bad_signature_is_rejected() {
    let config = config_without_webhook_enrichment();
    let app = create_test_app_with(config.clone()).await;

    let body = whatsapp_text_payload("34600111222", "wamid.9", "hola", Utc::now().timestamp());
    let response = app
        .call(
            Request::builder()
                .method("POST")
                .uri("/webhook/whatsapp")
                .header("x-hub-signature-256", "sha256=deadbeef")
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.db().list_unmatched(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_whatsapp_verification_handshake() {
    let app = create_test_app().await;

    let response = app
        .call(
            Request::builder()
                .uri("/webhook/whatsapp?hub.mode=subscribe&hub.challenge=abc123&hub.verify_token=test_verify_token")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"abc123");

    let response = app
        .call(
            Request::builder()
                .uri("/webhook/whatsapp?hub.mode=subscribe&hub.challenge=abc123&hub.verify_token=wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_malformed_payload_is_acknowledged_and_audited() {
    let config = config_without_webhook_enrichment();
    let app = create_test_app_with(config.clone()).await;

    let response = app.call(whatsapp_request(&config, "{not json".to_string())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "error");

    let audit = app
        .db()
        .list_audit(Some("webhook".to_string()), Some("whatsapp".to_string()), 10)
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, "webhook.malformed");
}

#[tokio::test]
async fn test_status_only_callback_is_ignored() {
    let config = config_without_webhook_enrichment();
    let app = create_test_app_with(config.clone()).await;

    let body = json!({
        "object": "whatsapp_business_account",
        "entry": [{ "changes": [{ "field": "messages", "value": {
            "statuses": [{ "id": "wamid.1", "status": "delivered" }]
        }}]}]
    })
    .to_string();
    let json = body_json(app.call(whatsapp_request(&config, body)).await).await;
    assert_eq!(json["status"], "ignored");
}

#[tokio::test]
async fn test_unknown_sender_is_stored_unmatched_and_can_be_linked() {
    let config = config_without_webhook_enrichment();
    let app = create_test_app_with(config.clone()).await;
    let athlete = seed_athlete(app.db(), "Ana", Some("+34600111222")).await;

    let body = whatsapp_text_payload("34699999999", "wamid.x", "¿Quién eres?", Utc::now().timestamp());
    let ack = body_json(app.call(whatsapp_request(&config, body)).await).await;
    assert_eq!(ack["status"], "success");
    assert_eq!(ack["results"][0]["unmatched"], true);
    let message_id = ack["message_id"].as_i64().unwrap();

    let unmatched = body_json(app.call(authed(&config, "GET", "/messages/unmatched")).await).await;
    assert_eq!(unmatched.as_array().unwrap().len(), 1);
    assert_eq!(unmatched[0]["id"].as_i64().unwrap(), message_id);

    let response = app
        .call(authed_json(
            &config,
            "POST",
            &format!("/messages/{}/link", message_id),
            json!({ "athlete_id": athlete.id }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let linked = body_json(response).await;
    assert_eq!(linked["athlete_id"].as_i64().unwrap(), athlete.id);
    assert_eq!(linked["unmatched"], false);

    assert!(app.db().list_unmatched(10).await.unwrap().is_empty());
    let audit = app
        .db()
        .list_audit(Some("message".to_string()), Some(message_id.to_string()), 10)
        .await
        .unwrap();
    assert!(audit.iter().any(|e| e.action == "message.link"));
}

#[tokio::test]
async fn test_telegram_requires_secret_and_matches_user_id() {
    let config = config_without_webhook_enrichment();
    let app = create_test_app_with(config.clone()).await;
    let athlete = app
        .db()
        .insert_athlete(coach_inbox::models::NewAthlete {
            name: "Leo".into(),
            telegram_user_id: Some("987".into()),
            ..Default::default()
        })
        .await
        .unwrap();

    let update = json!({
        "update_id": 1,
        "message": {
            "message_id": 55,
            "date": Utc::now().timestamp(),
            "chat": { "id": 987 },
            "from": { "id": 987, "is_bot": false },
            "text": "Terminé la serie"
        }
    })
    .to_string();

    let response = app
        .call(
            Request::builder()
                .method("POST")
                .uri("/webhook/telegram")
                .body(Body::from(update.clone()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .call(
            Request::builder()
                .method("POST")
                .uri("/webhook/telegram")
                .header("x-telegram-bot-api-secret-token", "test_telegram_secret")
                .body(Body::from(update))
                .unwrap(),
        )
        .await;
    let ack = body_json(response).await;
    assert_eq!(ack["status"], "success");
    let message = app
        .db()
        .get_message(ack["message_id"].as_i64().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.athlete_id, Some(athlete.id));
    assert_eq!(message.external_id.as_deref(), Some("987:55"));
}

#[tokio::test]
async fn test_email_webhook_matches_address_case_insensitively() {
    let config = config_without_webhook_enrichment();
    let app = create_test_app_with(config.clone()).await;
    let athlete = app
        .db()
        .insert_athlete(coach_inbox::models::NewAthlete {
            name: "Marta".into(),
            email: Some("marta@example.com".into()),
            ..Default::default()
        })
        .await
        .unwrap();

    let body = json!({
        "from": "Marta Ruiz <Marta@Example.com>",
        "subject": "Plan semana",
        "text": "¿Puedo cambiar el largo al domingo?",
        "message_id": "<abc@mail>"
    })
    .to_string();
    let response = app
        .call(
            Request::builder()
                .method("POST")
                .uri("/webhook/email")
                .header("x-webhook-token", "test_email_token")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    let ack = body_json(response).await;
    assert_eq!(ack["status"], "success");
    assert_eq!(ack["results"][0]["unmatched"], false);
    let message = app
        .db()
        .get_message(ack["message_id"].as_i64().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.athlete_id, Some(athlete.id));
}
