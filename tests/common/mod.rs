// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use coach_inbox::channels::ChannelSender;
use coach_inbox::config::Config;
use coach_inbox::db::Database;
use coach_inbox::error::{CollaboratorError, SendError};
use coach_inbox::middleware::auth::create_jwt;
use coach_inbox::models::{Athlete, Channel, NewAthlete, OutboxPayload};
use coach_inbox::routes::create_router;
use coach_inbox::services::{CompletionClient, CompletionKind, CompletionRequest, Transcriber};
use coach_inbox::AppState;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_COACH: &str = "coach-1";

/// Scripted answer for one completion kind.
#[derive(Clone)]
#[allow(dead_code)]
pub enum Script {
    Reply(String),
    Fail(CollaboratorError),
    /// Answer only after sleeping, to trip the action timeout
    Slow(Duration, String),
}

/// Completion client answering from a per-kind script.
#[derive(Default)]
pub struct ScriptedCompletion {
    scripts: Mutex<HashMap<CompletionKind, Script>>,
    calls: Mutex<Vec<CompletionKind>>,
}

#[allow(dead_code)]
impl ScriptedCompletion {
    pub fn set(&self, kind: CompletionKind, script: Script) {
        self.scripts.lock().unwrap().insert(kind, script);
    }

    pub fn calls(&self, kind: CompletionKind) -> usize {
        self.calls.lock().unwrap().iter().filter(|k| **k == kind).count()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CollaboratorError> {
        self.calls.lock().unwrap().push(request.kind);
        let script = self.scripts.lock().unwrap().get(&request.kind).cloned();
        match script {
            Some(Script::Reply(text)) => Ok(text),
            Some(Script::Fail(e)) => Err(e),
            Some(Script::Slow(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Err(CollaboratorError::NotConfigured),
        }
    }
}

/// Transcriber with a fixed result.
pub struct FakeTranscriber {
    result: Mutex<Result<String, CollaboratorError>>,
}

impl Default for FakeTranscriber {
    fn default() -> Self {
        Self {
            result: Mutex::new(Ok("transcribed audio".to_string())),
        }
    }
}

#[allow(dead_code)]
impl FakeTranscriber {
    pub fn set(&self, result: Result<String, CollaboratorError>) {
        *self.result.lock().unwrap() = result;
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _audio_ref: &str) -> Result<String, CollaboratorError> {
        self.result.lock().unwrap().clone()
    }
}

/// Channel sender that records every attempt and answers from a queue
/// (success once the queue is empty).
pub struct RecordingSender {
    channel: Channel,
    results: Mutex<VecDeque<Result<(), SendError>>>,
    sent: Mutex<Vec<(String, OutboxPayload)>>,
}

#[allow(dead_code)]
impl RecordingSender {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            results: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn push_result(&self, result: Result<(), SendError>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn attempts(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<(String, OutboxPayload)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelSender for RecordingSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, recipient: &str, payload: &OutboxPayload) -> Result<(), SendError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), payload.clone()));
        self.results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// Everything a test needs to drive the app and its fakes.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub completion: Arc<ScriptedCompletion>,
    pub transcriber: Arc<FakeTranscriber>,
}

#[allow(dead_code)]
impl TestApp {
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Send one request through a fresh clone of the router.
    pub async fn call(&self, request: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;
        self.router.clone().oneshot(request).await.unwrap()
    }
}

/// Create a test app on a fresh in-memory database.
#[allow(dead_code)]
pub async fn create_test_app() -> TestApp {
    create_test_app_with(Config::test_default()).await
}

/// Same as [`create_test_app`] with a custom configuration.
#[allow(dead_code)]
pub async fn create_test_app_with(config: Config) -> TestApp {
    let db = Database::open_in_memory()
        .await
        .expect("Failed to open in-memory database");
    let completion = Arc::new(ScriptedCompletion::default());
    let transcriber = Arc::new(FakeTranscriber::default());
    let state = Arc::new(AppState::new(
        config,
        db,
        transcriber.clone(),
        completion.clone(),
    ));
    TestApp {
        router: create_router(state.clone()),
        state,
        completion,
        transcriber,
    }
}

/// Configuration with webhook-triggered enrichment switched off, so tests do
/// not race a background task.
#[allow(dead_code)]
pub fn config_without_webhook_enrichment() -> Config {
    let mut config = Config::test_default();
    config.enrichment.webhook_highlights = false;
    config.enrichment.webhook_reply = false;
    config.enrichment.webhook_todo = false;
    config
}

#[allow(dead_code)]
pub fn create_test_jwt(config: &Config) -> String {
    create_jwt(TEST_COACH, &config.jwt_signing_key).unwrap()
}

#[allow(dead_code)]
pub async fn seed_athlete(db: &Database, name: &str, phone: Option<&str>) -> Athlete {
    db.insert_athlete(NewAthlete {
        name: name.to_string(),
        phone: phone.map(str::to_string),
        ..Default::default()
    })
    .await
    .unwrap()
}

/// `X-Hub-Signature-256` value for a WhatsApp payload.
#[allow(dead_code)]
pub fn whatsapp_signature(app_secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// WhatsApp Cloud API text message payload.
#[allow(dead_code)]
pub fn whatsapp_text_payload(from: &str, wamid: &str, text: &str, timestamp: i64) -> String {
    serde_json::json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "changes": [{
                "field": "messages",
                "value": {
                    "messages": [{
                        "from": from,
                        "id": wamid,
                        "timestamp": timestamp.to_string(),
                        "type": "text",
                        "text": { "body": text }
                    }]
                }
            }]
        }]
    })
    .to_string()
}

/// Signed WhatsApp webhook request.
#[allow(dead_code)]
pub fn whatsapp_request(config: &Config, body: String) -> Request<Body> {
    let signature = whatsapp_signature(&config.whatsapp.app_secret, body.as_bytes());
    Request::builder()
        .method("POST")
        .uri("/webhook/whatsapp")
        .header("content-type", "application/json")
        .header("x-hub-signature-256", signature)
        .body(Body::from(body))
        .unwrap()
}

/// Authenticated JSON request.
#[allow(dead_code)]
pub fn authed_json(
    config: &Config,
    method: &str,
    uri: &str,
    body: serde_json::Value,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", create_test_jwt(config)))
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Authenticated request without a body.
#[allow(dead_code)]
pub fn authed(config: &Config, method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", create_test_jwt(config)))
        .body(Body::empty())
        .unwrap()
}

#[allow(dead_code)]
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
