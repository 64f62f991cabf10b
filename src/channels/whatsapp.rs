// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! WhatsApp Cloud API adapter.
//!
//! Identity is the sender's phone number (`wa_id`). A single webhook
//! delivery may carry several messages and status callbacks; only messages
//! become events.

use super::media::{fetch_bytes, fetch_json, name_for_mime, MediaFile};
use super::{check_send_response, transport_error, ChannelSender};
use crate::config::WhatsAppConfig;
use crate::error::{CollaboratorError, SendError};
use crate::models::{Channel, OutboxPayload, RawEvent, RawSender};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// `audio_ref` prefix for Cloud API media ids.
pub const MEDIA_PREFIX: &str = "whatsapp-media:";

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub field: String,
    pub value: ChangeValue,
}

#[derive(Debug, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub messages: Vec<WaMessage>,
    #[serde(default)]
    pub statuses: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct WaMessage {
    pub from: String,
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<WaText>,
    #[serde(default)]
    pub audio: Option<WaMedia>,
    #[serde(default)]
    pub voice: Option<WaMedia>,
    #[serde(default)]
    pub image: Option<WaMedia>,
    #[serde(default)]
    pub video: Option<WaMedia>,
    #[serde(default)]
    pub document: Option<WaMedia>,
    #[serde(default)]
    pub button: Option<WaButton>,
}

#[derive(Debug, Deserialize)]
pub struct WaText {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct WaMedia {
    pub id: String,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WaButton {
    pub text: String,
}

/// Parsed webhook delivery.
#[derive(Debug)]
pub struct ParsedWebhook {
    pub events: Vec<RawEvent>,
    /// Status callbacks (delivered, read, ...) that carry no message
    pub status_updates: usize,
}

fn parse_timestamp(raw: Option<&str>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    raw.and_then(|t| t.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(fallback)
}

fn to_event(message: WaMessage, now: DateTime<Utc>) -> RawEvent {
    let received_at = parse_timestamp(message.timestamp.as_deref(), now);
    let media = |m: &Option<WaMedia>| m.as_ref().map(|m| format!("{}{}", MEDIA_PREFIX, m.id));
    let caption = |m: &Option<WaMedia>| m.as_ref().and_then(|m| m.caption.clone());

    let (text, audio_ref) = match message.kind.as_str() {
        "text" => (message.text.map(|t| t.body), None),
        "audio" | "voice" => (None, media(&message.audio).or_else(|| media(&message.voice))),
        "image" => (caption(&message.image).or(Some("[image]".to_string())), None),
        "video" => (caption(&message.video).or(Some("[video]".to_string())), None),
        "document" => (caption(&message.document).or(Some("[document]".to_string())), None),
        "button" => (message.button.map(|b| b.text), None),
        other => (Some(format!("[{} message]", other)), None),
    };

    RawEvent {
        channel: Channel::Whatsapp,
        sender: RawSender::Phone(message.from),
        text,
        audio_ref,
        external_id: Some(message.id),
        received_at,
    }
}

/// Parse a webhook body into events.
pub fn parse_webhook(body: &[u8], now: DateTime<Utc>) -> Result<ParsedWebhook, serde_json::Error> {
    let payload: WebhookPayload = serde_json::from_slice(body)?;
    let mut events = Vec::new();
    let mut status_updates = 0;
    for change in payload.entry.into_iter().flat_map(|e| e.changes) {
        status_updates += change.value.statuses.len();
        events.extend(change.value.messages.into_iter().map(|m| to_event(m, now)));
    }
    Ok(ParsedWebhook {
        events,
        status_updates,
    })
}

/// Verify `X-Hub-Signature-256` (`sha256=<hex>`) over the raw body.
pub fn verify_signature(app_secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(hex_sig) = header.and_then(|h| h.strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(signature) = hex::decode(hex_sig.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

#[derive(Deserialize)]
struct MediaInfo {
    url: String,
    mime_type: Option<String>,
}

/// Cloud API media download.
///
/// A media id resolves to a short-lived URL (`GET /{media-id}`), which is
/// itself fetched with the same bearer token.
#[derive(Clone)]
pub struct WhatsAppMedia {
    http: reqwest::Client,
    api_base_url: String,
    access_token: Option<String>,
}

impl WhatsAppMedia {
    pub fn new(http: reqwest::Client, config: &WhatsAppConfig) -> Self {
        Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        }
    }

    pub async fn fetch(&self, media_id: &str) -> Result<MediaFile, CollaboratorError> {
        let token = self
            .access_token
            .as_deref()
            .ok_or(CollaboratorError::NotConfigured)?;
        let info: MediaInfo = fetch_json(
            self.http
                .get(format!("{}/{}", self.api_base_url, media_id))
                .bearer_auth(token),
        )
        .await?;
        let bytes = fetch_bytes(self.http.get(&info.url).bearer_auth(token)).await?;
        tracing::debug!(media_id, bytes = bytes.len(), "WhatsApp media downloaded");
        Ok(MediaFile {
            bytes,
            file_name: name_for_mime(info.mime_type.as_deref()),
        })
    }
}

/// Cloud API text sender.
pub struct WhatsAppSender {
    http: reqwest::Client,
    api_base_url: String,
    access_token: Option<String>,
    phone_number_id: Option<String>,
}

impl WhatsAppSender {
    pub fn new(http: reqwest::Client, config: &WhatsAppConfig) -> Self {
        Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            phone_number_id: config.phone_number_id.clone(),
        }
    }
}

#[async_trait]
impl ChannelSender for WhatsAppSender {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    async fn send(&self, recipient: &str, payload: &OutboxPayload) -> Result<(), SendError> {
        let (Some(token), Some(phone_number_id)) = (&self.access_token, &self.phone_number_id)
        else {
            return Err(SendError::Permanent("whatsapp sender not configured".to_string()));
        };
        let to: String = recipient.chars().filter(|c| c.is_ascii_digit()).collect();
        if to.is_empty() {
            return Err(SendError::Permanent(format!("invalid recipient: {}", recipient)));
        }

        let response = self
            .http
            .post(format!("{}/{}/messages", self.api_base_url, phone_number_id))
            .bearer_auth(token)
            .json(&json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to,
                "type": "text",
                "text": { "preview_url": false, "body": payload.text },
            }))
            .send()
            .await
            .map_err(transport_error)?;
        check_send_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "contacts": [{"wa_id": "34600112233", "profile": {"name": "Ana"}}],
                        "messages": [
                            {"from": "34600112233", "id": "wamid.1", "timestamp": "1767261600",
                             "type": "text", "text": {"body": "Me duele la rodilla"}},
                            {"from": "34600112233", "id": "wamid.2", "timestamp": "1767261660",
                             "type": "audio", "audio": {"id": "media-9", "mime_type": "audio/ogg"}}
                        ],
                        "statuses": [{"id": "wamid.0", "status": "read"}]
                    }
                }]
            }]
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_parse_webhook_messages() {
        let parsed = parse_webhook(&sample(), Utc::now()).unwrap();
        assert_eq!(parsed.events.len(), 2);
        assert_eq!(parsed.status_updates, 1);

        let text = &parsed.events[0];
        assert_eq!(text.sender, RawSender::Phone("34600112233".into()));
        assert_eq!(text.text.as_deref(), Some("Me duele la rodilla"));
        assert_eq!(text.external_id.as_deref(), Some("wamid.1"));
        assert_eq!(text.received_at.timestamp(), 1767261600);

        let audio = &parsed.events[1];
        assert_eq!(audio.audio_ref.as_deref(), Some("whatsapp-media:media-9"));
        assert!(audio.text.is_none());
    }

    #[test]
    fn test_parse_webhook_rejects_garbage() {
        assert!(parse_webhook(b"not json", Utc::now()).is_err());
        assert!(parse_webhook(br#"{"entry": []}"#, Utc::now()).is_err());
    }

    #[test]
    fn test_signature_verification() {
        let body = b"{\"object\":\"whatsapp_business_account\"}";
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(body);
        let header = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert!(verify_signature("secret", body, Some(&header)));
        assert!(!verify_signature("other", body, Some(&header)));
        assert!(!verify_signature("secret", b"tampered", Some(&header)));
        assert!(!verify_signature("secret", body, None));
        assert!(!verify_signature("secret", body, Some("sha1=abcd")));
    }
}
