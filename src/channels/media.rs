// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Inbound media download.
//!
//! Adapters record audio as an opaque reference: a provider media id
//! (`whatsapp-media:<id>`, `telegram-file:<id>`) or a plain `http(s)` URL.
//! [`MediaResolver`] turns a reference into bytes for the transcriber.

use super::{telegram, telegram::TelegramMedia, whatsapp, whatsapp::WhatsAppMedia};
use crate::config::Config;
use crate::error::CollaboratorError;
use serde::de::DeserializeOwned;

/// Downloaded audio plus the file name to upload it under.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

#[derive(Clone)]
pub struct MediaResolver {
    http: reqwest::Client,
    whatsapp: WhatsAppMedia,
    telegram: TelegramMedia,
}

impl MediaResolver {
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        Self {
            whatsapp: WhatsAppMedia::new(http.clone(), &config.whatsapp),
            telegram: TelegramMedia::new(http.clone(), &config.telegram),
            http,
        }
    }

    pub async fn fetch(&self, audio_ref: &str) -> Result<MediaFile, CollaboratorError> {
        if let Some(media_id) = audio_ref.strip_prefix(whatsapp::MEDIA_PREFIX) {
            return self.whatsapp.fetch(media_id).await;
        }
        if let Some(file_id) = audio_ref.strip_prefix(telegram::FILE_PREFIX) {
            return self.telegram.fetch(file_id).await;
        }
        if audio_ref.starts_with("http://") || audio_ref.starts_with("https://") {
            let bytes = fetch_bytes(self.http.get(audio_ref)).await?;
            return Ok(MediaFile {
                bytes,
                file_name: upload_name(audio_ref),
            });
        }
        Err(CollaboratorError::Unsupported(audio_ref.to_string()))
    }
}

fn check_status(response: &reqwest::Response) -> Option<u16> {
    (!response.status().is_success()).then(|| response.status().as_u16())
}

pub(crate) async fn fetch_bytes(
    request: reqwest::RequestBuilder,
) -> Result<Vec<u8>, CollaboratorError> {
    let response = request
        .send()
        .await
        .map_err(|e| CollaboratorError::Transport(e.to_string()))?;
    if let Some(status) = check_status(&response) {
        let body = response.text().await.unwrap_or_default();
        return Err(CollaboratorError::Http { status, body });
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| CollaboratorError::Transport(e.to_string()))?;
    Ok(bytes.to_vec())
}

pub(crate) async fn fetch_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, CollaboratorError> {
    let bytes = fetch_bytes(request).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CollaboratorError::Malformed(format!("media lookup: {}", e)))
}

/// File name sent with the upload; the transcription API sniffs the format
/// from its extension.
pub fn upload_name(path_or_url: &str) -> String {
    let last = path_or_url
        .split(&['?', '#'][..])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .unwrap_or("");
    match last.rsplit_once('.') {
        // Telegram voice notes are Opus in an Ogg container
        Some((stem, "oga")) => format!("{}.ogg", stem),
        Some(_) => last.to_string(),
        None => "audio.ogg".to_string(),
    }
}

/// Upload name for a MIME type reported by a provider.
pub fn name_for_mime(mime: Option<&str>) -> String {
    let essence = mime.and_then(|m| m.split(';').next()).map(str::trim);
    let ext = match essence {
        Some("audio/mpeg") => "mp3",
        Some("audio/mp4") | Some("audio/aac") => "m4a",
        Some("audio/wav") | Some("audio/x-wav") => "wav",
        Some("audio/webm") => "webm",
        Some("audio/amr") => "amr",
        _ => "ogg",
    };
    format!("audio.{}", ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_name() {
        assert_eq!(upload_name("https://cdn.example.com/a/voice.mp3?sig=1"), "voice.mp3");
        assert_eq!(upload_name("https://cdn.example.com/media/12345"), "audio.ogg");
        assert_eq!(upload_name("voice/file_3.oga"), "file_3.ogg");
    }

    #[test]
    fn test_name_for_mime() {
        assert_eq!(name_for_mime(Some("audio/ogg; codecs=opus")), "audio.ogg");
        assert_eq!(name_for_mime(Some("audio/mpeg")), "audio.mp3");
        assert_eq!(name_for_mime(None), "audio.ogg");
    }

    #[tokio::test]
    async fn test_unknown_reference_is_unsupported() {
        let resolver = MediaResolver::new(reqwest::Client::new(), &Config::test_default());
        let err = resolver.fetch("ftp://example.com/a.ogg").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Unsupported(_)));
    }
}
