// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Telegram Bot API adapter.
//!
//! Athletes are matched by the bot-scoped user id. The webhook is
//! authenticated with the `X-Telegram-Bot-Api-Secret-Token` header set when
//! the webhook was registered.

use super::media::{fetch_bytes, fetch_json, upload_name, MediaFile};
use super::{check_send_response, transport_error, ChannelSender};
use crate::config::TelegramConfig;
use crate::error::{CollaboratorError, SendError};
use crate::models::{Channel, OutboxPayload, RawEvent, RawSender};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// `audio_ref` prefix for Bot API file ids.
pub const FILE_PREFIX: &str = "telegram-file:";

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TgMessage>,
    #[serde(default)]
    pub edited_message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
    pub date: i64,
    pub chat: TgChat,
    #[serde(default)]
    pub from: Option<TgUser>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub voice: Option<TgFile>,
    #[serde(default)]
    pub audio: Option<TgFile>,
    #[serde(default)]
    pub photo: Option<Vec<TgFile>>,
    #[serde(default)]
    pub document: Option<TgFile>,
}

#[derive(Debug, Deserialize)]
pub struct TgChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Deserialize)]
pub struct TgFile {
    pub file_id: String,
}

/// Parse one update. Updates without a message (callbacks, edits, member
/// changes) and messages from bots yield no event.
pub fn parse_update(body: &[u8], now: DateTime<Utc>) -> Result<Option<RawEvent>, serde_json::Error> {
    let update: Update = serde_json::from_slice(body)?;
    let Some(message) = update.message else {
        return Ok(None);
    };

    let sender = match &message.from {
        Some(user) if user.is_bot => return Ok(None),
        Some(user) => RawSender::UserId(user.id.to_string()),
        None => RawSender::Unknown(format!("chat:{}", message.chat.id)),
    };

    let audio_ref = message
        .voice
        .as_ref()
        .or(message.audio.as_ref())
        .map(|f| format!("{}{}", FILE_PREFIX, f.file_id));

    let placeholder = if message.photo.is_some() {
        "[photo]"
    } else if message.document.is_some() {
        "[document]"
    } else {
        "[unsupported message]"
    };
    let text = match (message.text.clone().or(message.caption.clone()), &audio_ref) {
        (Some(text), _) => Some(text),
        (None, Some(_)) => None,
        (None, None) => Some(placeholder.to_string()),
    };

    Ok(Some(RawEvent {
        channel: Channel::Telegram,
        sender,
        text,
        audio_ref,
        external_id: Some(format!("{}:{}", message.chat.id, message.message_id)),
        received_at: DateTime::from_timestamp(message.date, 0).unwrap_or(now),
    }))
}

#[derive(Deserialize)]
struct GetFileResponse {
    ok: bool,
    result: Option<FilePath>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct FilePath {
    file_path: Option<String>,
}

/// Bot API file download: `getFile` yields a path under `file/bot<token>/`.
#[derive(Clone)]
pub struct TelegramMedia {
    http: reqwest::Client,
    api_base_url: String,
    bot_token: Option<String>,
}

impl TelegramMedia {
    pub fn new(http: reqwest::Client, config: &TelegramConfig) -> Self {
        Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
        }
    }

    pub async fn fetch(&self, file_id: &str) -> Result<MediaFile, CollaboratorError> {
        let token = self
            .bot_token
            .as_deref()
            .ok_or(CollaboratorError::NotConfigured)?;
        let lookup: GetFileResponse = fetch_json(
            self.http
                .get(format!("{}/bot{}/getFile", self.api_base_url, token))
                .query(&[("file_id", file_id)]),
        )
        .await?;
        let path = match lookup {
            GetFileResponse {
                ok: true,
                result: Some(FilePath { file_path: Some(path) }),
                ..
            } => path,
            GetFileResponse { description, .. } => {
                return Err(CollaboratorError::Malformed(format!(
                    "getFile: {}",
                    description.unwrap_or_else(|| "no file_path".to_string())
                )))
            }
        };
        let bytes = fetch_bytes(
            self.http
                .get(format!("{}/file/bot{}/{}", self.api_base_url, token, path)),
        )
        .await?;
        tracing::debug!(file_id, bytes = bytes.len(), "Telegram file downloaded");
        Ok(MediaFile {
            bytes,
            file_name: upload_name(&path),
        })
    }
}

pub struct TelegramSender {
    http: reqwest::Client,
    api_base_url: String,
    bot_token: Option<String>,
}

impl TelegramSender {
    pub fn new(http: reqwest::Client, config: &TelegramConfig) -> Self {
        Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
        }
    }
}

#[async_trait]
impl ChannelSender for TelegramSender {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    /// Private chats share their id with the user, so the stored user id is
    /// the chat id.
    async fn send(&self, recipient: &str, payload: &OutboxPayload) -> Result<(), SendError> {
        let Some(token) = &self.bot_token else {
            return Err(SendError::Permanent("telegram sender not configured".to_string()));
        };
        let chat_id: i64 = recipient
            .trim()
            .parse()
            .map_err(|_| SendError::Permanent(format!("invalid chat id: {}", recipient)))?;

        let response = self
            .http
            .post(format!("{}/bot{}/sendMessage", self.api_base_url, token))
            .json(&json!({ "chat_id": chat_id, "text": payload.text }))
            .send()
            .await
            .map_err(transport_error)?;
        check_send_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_update() {
        let body = json!({
            "update_id": 10,
            "message": {
                "message_id": 77,
                "date": 1767261600,
                "chat": {"id": 987, "type": "private"},
                "from": {"id": 987, "is_bot": false, "first_name": "Ana"},
                "text": "Hoy 12 km suaves"
            }
        })
        .to_string();
        let event = parse_update(body.as_bytes(), Utc::now()).unwrap().unwrap();
        assert_eq!(event.sender, RawSender::UserId("987".into()));
        assert_eq!(event.external_id.as_deref(), Some("987:77"));
        assert_eq!(event.text.as_deref(), Some("Hoy 12 km suaves"));
        assert_eq!(event.received_at.timestamp(), 1767261600);
    }

    #[test]
    fn test_parse_voice_update() {
        let body = json!({
            "update_id": 11,
            "message": {
                "message_id": 78,
                "date": 1767261600,
                "chat": {"id": 987},
                "from": {"id": 987, "is_bot": false},
                "voice": {"file_id": "AwADBAAD", "duration": 4}
            }
        })
        .to_string();
        let event = parse_update(body.as_bytes(), Utc::now()).unwrap().unwrap();
        assert_eq!(event.audio_ref.as_deref(), Some("telegram-file:AwADBAAD"));
        assert!(event.text.is_none());
    }

    #[test]
    fn test_non_message_updates_are_ignored() {
        let edited = json!({
            "update_id": 12,
            "edited_message": {"message_id": 1, "date": 0, "chat": {"id": 1}, "text": "x"}
        })
        .to_string();
        assert!(parse_update(edited.as_bytes(), Utc::now()).unwrap().is_none());

        let from_bot = json!({
            "update_id": 13,
            "message": {"message_id": 2, "date": 0, "chat": {"id": 1},
                        "from": {"id": 5, "is_bot": true}, "text": "x"}
        })
        .to_string();
        assert!(parse_update(from_bot.as_bytes(), Utc::now()).unwrap().is_none());

        assert!(parse_update(b"{}", Utc::now()).is_err());
    }
}
