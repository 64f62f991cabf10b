// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Deduplicator & Store.
//!
//! A delivery is identified by its external provider id when it has one and
//! otherwise by a content fingerprint:
//!
//! ```text
//! sha256(channel | sender key | normalized body | audio ref | time bucket)
//! ```
//!
//! The lookup also checks the two neighbouring buckets, so a retry whose
//! arrival time crosses a bucket boundary still collapses onto the original.

use crate::config::IngestConfig;
use crate::db::{Database, InboundInsert};
use crate::error::AppError;
use crate::models::{Channel, Message, MessageEvent, RawEvent, StoreOutcome};
use crate::services::normalizer::Normalizer;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Coarse time bucket folded into the fingerprint.
pub fn time_bucket(at: DateTime<Utc>, bucket_secs: i64) -> i64 {
    at.timestamp().div_euclid(bucket_secs.max(1))
}

/// Stable content hash of one delivery.
pub fn fingerprint(
    channel: Channel,
    sender_key: &str,
    body: &str,
    audio_ref: Option<&str>,
    bucket: i64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(channel.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(sender_key.as_bytes());
    hasher.update(b"|");
    hasher.update(body.to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(audio_ref.unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(bucket.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Result of ingesting one raw event.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub outcome: StoreOutcome,
    pub event: MessageEvent,
}

pub struct IngestService {
    db: Database,
    normalizer: Normalizer,
    config: IngestConfig,
}

impl IngestService {
    pub fn new(db: Database, normalizer: Normalizer, config: IngestConfig) -> Self {
        Self {
            db,
            normalizer,
            config,
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Normalize and store one event.
    ///
    /// Redeliveries return [`StoreOutcome::Duplicate`] with the id of the
    /// original row and cause no other side effects. Only storage failures
    /// are errors.
    pub async fn ingest(&self, raw: RawEvent, now: DateTime<Utc>) -> Result<Ingested, AppError> {
        let event = self.normalizer.normalize(raw).await?;
        let outcome = self.store(event.clone(), now).await?;

        match outcome {
            StoreOutcome::Created(message_id) => tracing::info!(
                message_id,
                channel = %event.channel,
                athlete_id = ?event.athlete_id,
                transcription_failed = event.transcription_failed,
                "Message stored"
            ),
            StoreOutcome::Duplicate(message_id) => tracing::info!(
                message_id,
                channel = %event.channel,
                external_id = ?event.external_id,
                "Duplicate delivery ignored"
            ),
        }

        Ok(Ingested { outcome, event })
    }

    /// Insert-or-return-existing for an already normalized event.
    pub async fn store(
        &self,
        event: MessageEvent,
        now: DateTime<Utc>,
    ) -> Result<StoreOutcome, AppError> {
        let bucket_secs = self.config.fingerprint_bucket_secs;
        let bucket = time_bucket(event.received_at, bucket_secs);
        let sender_key = event.sender_identity.key();
        let audio_ref = event.audio_ref.as_deref();

        let print = |b: i64| fingerprint(event.channel, &sender_key, &event.body_text, audio_ref, b);
        let current = print(bucket);
        let lookup_fingerprints = vec![current.clone(), print(bucket - 1), print(bucket + 1)];

        let insert = InboundInsert {
            fingerprint: current,
            lookup_fingerprints,
            window_start: event.received_at - self.config.dedupe_window,
            idle_cutoff: event.received_at - self.config.conversation_idle,
            now,
            event,
        };
        self.db.store_inbound(insert).await
    }

    /// Link an unmatched message to an athlete.
    pub async fn link_unmatched(
        &self,
        message_id: i64,
        athlete_id: i64,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Message, AppError> {
        let message = self
            .db
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("message {}", message_id)))?;
        if !message.unmatched {
            return Err(AppError::BadRequest(format!(
                "message {} is already linked",
                message_id
            )));
        }
        if self.db.get_athlete(athlete_id).await?.is_none() {
            return Err(AppError::NotFound(format!("athlete {}", athlete_id)));
        }

        let idle_cutoff = message.received_at - self.config.conversation_idle;
        let linked = self
            .db
            .link_message(message_id, athlete_id, idle_cutoff, actor.to_string(), now)
            .await?
            .ok_or_else(|| {
                AppError::BadRequest(format!("message {} is already linked", message_id))
            })?;
        tracing::info!(message_id, athlete_id, "Unmatched message linked");
        Ok(linked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fingerprint_is_stable_within_bucket() {
        let a = Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 5).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 50).unwrap();
        assert_eq!(time_bucket(a, 60), time_bucket(b, 60));

        let fa = fingerprint(Channel::Whatsapp, "phone:+34600", "Hola", None, time_bucket(a, 60));
        let fb = fingerprint(Channel::Whatsapp, "phone:+34600", "hola", None, time_bucket(b, 60));
        assert_eq!(fa, fb);
        assert_eq!(fa.len(), 64);
    }

    #[test]
    fn test_fingerprint_separates_inputs() {
        let base = fingerprint(Channel::Whatsapp, "phone:+34600", "Hola", None, 1);
        assert_ne!(base, fingerprint(Channel::Telegram, "phone:+34600", "Hola", None, 1));
        assert_ne!(base, fingerprint(Channel::Whatsapp, "phone:+34601", "Hola", None, 1));
        assert_ne!(base, fingerprint(Channel::Whatsapp, "phone:+34600", "Adios", None, 1));
        assert_ne!(base, fingerprint(Channel::Whatsapp, "phone:+34600", "Hola", None, 2));
        assert_ne!(
            base,
            fingerprint(Channel::Whatsapp, "phone:+34600", "Hola", Some("a.ogg"), 1)
        );
    }

    #[test]
    fn test_time_bucket_handles_pre_epoch() {
        let t = Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 30).unwrap();
        assert_eq!(time_bucket(t, 60), -1);
    }
}
