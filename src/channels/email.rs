// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Email through an HTTP relay.
//!
//! The relay posts each inbound mail as JSON with a shared `X-Webhook-Token`
//! header and accepts outbound mail on its send endpoint.

use super::{check_send_response, transport_error, ChannelSender};
use crate::config::EmailConfig;
use crate::error::SendError;
use crate::models::{Channel, OutboxPayload, RawEvent, RawSender};
use crate::time_utils::parse_rfc3339;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

pub const TOKEN_HEADER: &str = "x-webhook-token";

const DEFAULT_SUBJECT: &str = "Message from your coach";

/// Inbound mail as posted by the relay.
#[derive(Debug, Deserialize)]
pub struct InboundEmail {
    pub from: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub received_at: Option<String>,
}

/// Extract the bare address from `Name <addr>` or `addr`, lower-cased.
pub fn extract_address(from: &str) -> Option<String> {
    let candidate = match (from.rfind('<'), from.rfind('>')) {
        (Some(start), Some(end)) if start < end => &from[start + 1..end],
        _ => from,
    };
    let address = candidate.trim().to_lowercase();
    let (local, domain) = address.split_once('@')?;
    if local.is_empty() || domain.is_empty() || address.contains(char::is_whitespace) {
        return None;
    }
    Some(address)
}

/// Parse one relay post. The subject stands in for an empty body.
pub fn parse_inbound(body: &[u8], now: DateTime<Utc>) -> Result<RawEvent, serde_json::Error> {
    let mail: InboundEmail = serde_json::from_slice(body)?;

    let sender = match extract_address(&mail.from) {
        Some(address) => RawSender::Email(address),
        None => RawSender::Unknown(mail.from.clone()),
    };
    let text = mail
        .text
        .filter(|t| !t.trim().is_empty())
        .or(mail.subject.filter(|s| !s.trim().is_empty()));
    let received_at = mail
        .received_at
        .as_deref()
        .and_then(parse_rfc3339)
        .unwrap_or(now);

    Ok(RawEvent {
        channel: Channel::Email,
        sender,
        text,
        audio_ref: None,
        external_id: mail.message_id.map(|id| id.trim().to_string()),
        received_at,
    })
}

pub struct EmailSender {
    http: reqwest::Client,
    relay_url: Option<String>,
    relay_token: Option<String>,
    from_address: String,
}

impl EmailSender {
    pub fn new(http: reqwest::Client, config: &EmailConfig) -> Self {
        Self {
            http,
            relay_url: config.relay_url.clone(),
            relay_token: config.relay_token.clone(),
            from_address: config.from_address.clone(),
        }
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, recipient: &str, payload: &OutboxPayload) -> Result<(), SendError> {
        let Some(url) = &self.relay_url else {
            return Err(SendError::Permanent("email relay not configured".to_string()));
        };
        let to = extract_address(recipient)
            .ok_or_else(|| SendError::Permanent(format!("invalid address: {}", recipient)))?;

        let mut request = self.http.post(url).json(&json!({
            "from": self.from_address,
            "to": to,
            "subject": payload.subject.as_deref().unwrap_or(DEFAULT_SUBJECT),
            "text": payload.text,
        }));
        if let Some(token) = &self.relay_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(transport_error)?;
        check_send_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_address() {
        assert_eq!(
            extract_address("Ana Pérez <Ana@Example.com>").as_deref(),
            Some("ana@example.com")
        );
        assert_eq!(extract_address(" ana@example.com ").as_deref(), Some("ana@example.com"));
        assert_eq!(extract_address("not an address"), None);
        assert_eq!(extract_address("@example.com"), None);
    }

    #[test]
    fn test_parse_inbound_falls_back_to_subject() {
        let body = json!({
            "from": "Ana <ana@example.com>",
            "subject": "Dudas sobre el plan",
            "text": "   ",
            "message_id": "<abc@mail>",
            "received_at": "2026-05-01T10:00:00Z"
        })
        .to_string();
        let event = parse_inbound(body.as_bytes(), Utc::now()).unwrap();
        assert_eq!(event.sender, RawSender::Email("ana@example.com".into()));
        assert_eq!(event.text.as_deref(), Some("Dudas sobre el plan"));
        assert_eq!(event.external_id.as_deref(), Some("<abc@mail>"));
        assert_eq!(event.received_at.to_rfc3339(), "2026-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_parse_inbound_requires_from() {
        assert!(parse_inbound(br#"{"text": "hola"}"#, Utc::now()).is_err());
    }
}
