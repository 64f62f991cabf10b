// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Speech-to-text collaborator.

use crate::channels::media::MediaResolver;
use crate::config::CompletionConfig;
use crate::error::CollaboratorError;
use async_trait::async_trait;
use serde::Deserialize;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio behind `audio_ref`.
    async fn transcribe(&self, audio_ref: &str) -> Result<String, CollaboratorError>;
}

/// Whisper-style transcription over an OpenAI-compatible API.
///
/// Audio is fetched through the [`MediaResolver`], so provider media ids
/// and plain URLs are both accepted.
#[derive(Clone)]
pub struct WhisperTranscriber {
    http: reqwest::Client,
    media: MediaResolver,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(config: &CompletionConfig, media: MediaResolver) -> Self {
        Self {
            http: reqwest::Client::new(),
            media,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.transcription_model.clone(),
        }
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio_ref: &str) -> Result<String, CollaboratorError> {
        let api_key = self.api_key.as_deref().ok_or(CollaboratorError::NotConfigured)?;

        let audio = self.media.fetch(audio_ref).await?;
        tracing::debug!(bytes = audio.bytes.len(), file_name = %audio.file_name, "Audio fetched for transcription");

        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.bytes).file_name(audio.file_name),
            );

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Http { status, body });
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Malformed(format!("JSON parse error: {}", e)))?;
        Ok(parsed.text.trim().to_string())
    }
}
