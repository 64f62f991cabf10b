// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Normalizer: canonical message bodies and sender identity resolution.
//!
//! Each [`Identity`] variant has its own matching strategy:
//! - `Athlete`: the id must exist
//! - `Phone`: compare trailing digits against every stored athlete phone
//! - `ExternalUserId`: exact match on the channel's handle column
//! - `Unresolved`: never matches; the message is stored as unmatched

use crate::config::IngestConfig;
use crate::db::Database;
use crate::error::{AppError, CollaboratorError};
use crate::models::{Channel, Identity, MessageEvent, RawEvent, RawSender};
use crate::services::transcription::Transcriber;
use std::sync::Arc;

/// Minimum number of trailing digits two phone numbers must share to match.
const MIN_PHONE_MATCH_DIGITS: usize = 8;
/// Trailing digits compared when both numbers are long enough.
const MAX_PHONE_MATCH_DIGITS: usize = 10;

/// Normalize a free-text phone number to E.164.
///
/// Punctuation is stripped, a `00` international prefix becomes `+`, a
/// national trunk `0` is dropped and `default_country_code` is prepended to
/// national numbers. Returns `None` if the result is not 8 to 15 digits.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("whatsapp:").unwrap_or(trimmed);
    let international = trimmed.starts_with('+');
    let mut digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }

    if !international {
        if let Some(rest) = digits.strip_prefix("00") {
            digits = rest.to_string();
        } else {
            if digits.starts_with('0') && digits.len() > 9 {
                digits.remove(0);
            }
            if digits.len() <= 9 {
                digits = format!("{}{}", default_country_code, digits);
            }
        }
    }

    if (8..=15).contains(&digits.len()) {
        Some(format!("+{}", digits))
    } else {
        None
    }
}

/// True if two phone numbers refer to the same line.
///
/// Numbers stored with and without a country code still match as long as
/// their trailing digits agree.
pub fn phones_match(a: &str, b: &str) -> bool {
    let a: Vec<char> = a.chars().filter(|c| c.is_ascii_digit()).collect();
    let b: Vec<char> = b.chars().filter(|c| c.is_ascii_digit()).collect();
    let n = a.len().min(b.len()).min(MAX_PHONE_MATCH_DIGITS);
    if n < MIN_PHONE_MATCH_DIGITS {
        return false;
    }
    a[a.len() - n..] == b[b.len() - n..]
}

/// Canonical body text: trimmed, with runs of whitespace collapsed.
pub fn normalize_body(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Map an adapter-level sender handle to a canonical identity.
pub fn identity_for(channel: Channel, sender: &RawSender, default_country_code: &str) -> Identity {
    match sender {
        RawSender::AthleteId(id) => Identity::Athlete { athlete_id: *id },
        RawSender::Phone(raw) => match normalize_phone(raw, default_country_code) {
            Some(e164) => Identity::Phone { e164 },
            None => Identity::Unresolved { raw: raw.clone() },
        },
        RawSender::UserId(id) if !id.trim().is_empty() => Identity::ExternalUserId {
            channel,
            id: id.trim().to_string(),
        },
        RawSender::Email(address) if address.contains('@') => Identity::ExternalUserId {
            channel: Channel::Email,
            id: address.trim().to_lowercase(),
        },
        RawSender::UserId(raw) | RawSender::Email(raw) | RawSender::Unknown(raw) => {
            Identity::Unresolved { raw: raw.clone() }
        }
    }
}

/// Turns adapter output into [`MessageEvent`]s.
pub struct Normalizer {
    db: Database,
    transcriber: Arc<dyn Transcriber>,
    config: IngestConfig,
}

impl Normalizer {
    pub fn new(db: Database, transcriber: Arc<dyn Transcriber>, config: IngestConfig) -> Self {
        Self {
            db,
            transcriber,
            config,
        }
    }

    /// Resolve the sender and build the canonical body.
    ///
    /// Blocks on the speech-to-text collaborator when the event carries
    /// audio. A transcription failure never fails the event; it is flagged
    /// on the result instead. Only storage errors are returned.
    pub async fn normalize(&self, raw: RawEvent) -> Result<MessageEvent, AppError> {
        let identity = identity_for(raw.channel, &raw.sender, &self.config.default_country_code);
        let athlete_id = self.resolve(&identity).await?;
        if athlete_id.is_none() {
            tracing::info!(
                channel = %raw.channel,
                sender = %identity.key(),
                "Sender not matched to an athlete"
            );
        }

        let text = raw.text.as_deref().map(normalize_body).unwrap_or_default();
        let mut transcription_failed = false;
        let body_text = match &raw.audio_ref {
            Some(audio_ref) => match self.transcribe(audio_ref).await {
                Ok(transcript) if text.is_empty() => normalize_body(&transcript),
                Ok(transcript) => format!("{}\n\n{}", text, normalize_body(&transcript)),
                Err(e) => {
                    tracing::warn!(
                        channel = %raw.channel,
                        audio_ref = %audio_ref,
                        error = %e,
                        "Transcription failed, storing message without transcript"
                    );
                    transcription_failed = true;
                    text
                }
            },
            None => text,
        };

        Ok(MessageEvent {
            channel: raw.channel,
            sender_identity: identity,
            athlete_id,
            body_text,
            audio_ref: raw.audio_ref,
            external_id: raw.external_id,
            transcription_failed,
            received_at: raw.received_at,
        })
    }

    async fn transcribe(&self, audio_ref: &str) -> Result<String, CollaboratorError> {
        let timeout = self.config.transcription_timeout;
        match tokio::time::timeout(timeout, self.transcriber.transcribe(audio_ref)).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(timeout)),
        }
    }

    /// Find the athlete behind an identity.
    pub async fn resolve(&self, identity: &Identity) -> Result<Option<i64>, AppError> {
        match identity {
            Identity::Athlete { athlete_id } => {
                Ok(self.db.get_athlete(*athlete_id).await?.map(|a| a.id))
            }
            Identity::Phone { e164 } => {
                let phones = self.db.athlete_phones().await?;
                Ok(phones
                    .into_iter()
                    .find(|(_, stored)| phones_match(stored, e164))
                    .map(|(id, _)| id))
            }
            Identity::ExternalUserId { channel, id } => match channel {
                Channel::Telegram => self.db.find_athlete_by_telegram_id(id).await,
                Channel::Email => self.db.find_athlete_by_email(id).await,
                Channel::Whatsapp => {
                    // WhatsApp ids are phone numbers without the plus sign
                    let phones = self.db.athlete_phones().await?;
                    Ok(phones
                        .into_iter()
                        .find(|(_, stored)| phones_match(stored, id))
                        .map(|(athlete_id, _)| athlete_id))
                }
                Channel::Manual => Ok(None),
            },
            Identity::Unresolved { .. } => Ok(None),
        }
    }
}
