// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outbox dispatcher.
//!
//! Each sweep claims due `pending` entries (a lease plus a claim token, so
//! several dispatcher instances never attempt the same entry at once). The
//! claim itself counts the attempt, so a dispatcher that crashes mid-send
//! still moves the entry toward its ceiling. Claimed entries are sent with
//! bounded concurrency and the result recorded:
//!
//! - success: `sent`
//! - retryable failure below the attempt ceiling: audited as failed, back to
//!   `pending` with exponential backoff
//! - permanent failure or attempt ceiling reached: `dead`, audited
//!
//! No lock is held across the network call.

use crate::channels::ChannelRegistry;
use crate::config::DispatchConfig;
use crate::db::Database;
use crate::error::{AppError, SendError};
use crate::models::OutboxEntry;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;

/// Maximum concurrent sends per sweep
const MAX_CONCURRENT_SENDS: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl From<&DispatchConfig> for BackoffPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            base: config.base_delay,
            cap: config.max_delay,
        }
    }
}

/// Delay before retrying after the `attempt`-th failure (1-based).
///
/// `base * 2^(attempt-1)` plus up to half of that again as jitter
/// (`jitter_frac` in `[0, 1)`), capped. The jitter never exceeds the next
/// doubling, so successive delays only grow until they reach the cap.
pub fn backoff_delay(policy: &BackoffPolicy, attempt: u32, jitter_frac: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(30);
    let exp = policy.base.saturating_mul(1u32 << exponent);
    let jitter = exp.mul_f64(0.5 * jitter_frac.clamp(0.0, 0.999));
    exp.saturating_add(jitter).min(policy.cap)
}

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub dead: usize,
    /// Results not applied because the claim had expired and moved on
    pub lost: usize,
}

enum Delivery {
    Sent,
    Retried,
    Dead,
    Lost,
}

pub struct Dispatcher {
    db: Database,
    channels: ChannelRegistry,
    config: DispatchConfig,
    backoff: BackoffPolicy,
}

impl Dispatcher {
    pub fn new(db: Database, channels: ChannelRegistry, config: DispatchConfig) -> Self {
        let backoff = BackoffPolicy::from(&config);
        Self {
            db,
            channels,
            config,
            backoff,
        }
    }

    /// Claim and attempt every due entry once.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<DispatchReport, AppError> {
        let lease = chrono::Duration::from_std(self.config.claim_lease)
            .map_err(|e| AppError::Internal(e.into()))?;
        let batch = self
            .db
            .claim_due_outbox(now, lease, self.config.batch_size, self.config.max_attempts)
            .await?;
        for id in &batch.exhausted {
            tracing::error!(outbox_id = id, "Outbox entry dead-lettered after unrecorded attempts");
        }

        let entries = batch.claimed;
        let mut report = DispatchReport {
            claimed: entries.len(),
            dead: batch.exhausted.len(),
            ..Default::default()
        };
        if entries.is_empty() {
            return Ok(report);
        }

        let results = stream::iter(entries)
            .map(|entry| self.deliver(entry, now))
            .buffer_unordered(MAX_CONCURRENT_SENDS)
            .collect::<Vec<Result<Delivery, AppError>>>()
            .await;

        for result in results {
            match result? {
                Delivery::Sent => report.sent += 1,
                Delivery::Retried => report.retried += 1,
                Delivery::Dead => report.dead += 1,
                Delivery::Lost => report.lost += 1,
            }
        }
        Ok(report)
    }

    async fn attempt(&self, entry: &OutboxEntry) -> Result<(), SendError> {
        let sender = self.channels.get(entry.channel).ok_or_else(|| {
            SendError::Permanent(format!("no sender for channel {}", entry.channel))
        })?;
        match tokio::time::timeout(
            self.config.send_timeout,
            sender.send(&entry.recipient, &entry.payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SendError::Retryable(format!(
                "send timed out after {:?}",
                self.config.send_timeout
            ))),
        }
    }

    async fn deliver(&self, entry: OutboxEntry, now: DateTime<Utc>) -> Result<Delivery, AppError> {
        let token = entry.claim_token.clone().unwrap_or_default();
        let attempts = entry.attempts;

        let applied = match self.attempt(&entry).await {
            Ok(()) => {
                tracing::info!(outbox_id = entry.id, channel = %entry.channel, attempts, "Outbox entry sent");
                self.db
                    .mark_outbox_sent(entry.id, token, now)
                    .await?
                    .then_some(Delivery::Sent)
            }
            Err(e) if e.is_retryable() && attempts < self.config.max_attempts => {
                let jitter = rand::thread_rng().gen::<f64>();
                let delay = backoff_delay(&self.backoff, attempts, jitter);
                let next_at = now
                    + chrono::Duration::from_std(delay)
                        .map_err(|e| AppError::Internal(e.into()))?;
                tracing::warn!(
                    outbox_id = entry.id,
                    channel = %entry.channel,
                    attempts,
                    retry_in_secs = delay.as_secs(),
                    error = %e,
                    "Outbox send failed, will retry"
                );
                self.db
                    .mark_outbox_retry(entry.id, token, next_at, e.to_string(), now)
                    .await?
                    .then_some(Delivery::Retried)
            }
            Err(e) => {
                tracing::error!(
                    outbox_id = entry.id,
                    channel = %entry.channel,
                    attempts,
                    error = %e,
                    "Outbox entry dead-lettered"
                );
                self.db
                    .mark_outbox_dead(entry.id, token, e.to_string(), now)
                    .await?
                    .then_some(Delivery::Dead)
            }
        };

        Ok(applied.unwrap_or_else(|| {
            tracing::warn!(outbox_id = entry.id, "Outbox claim expired before result was recorded");
            Delivery::Lost
        }))
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Dispatcher started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_once(Utc::now()).await {
                        Ok(report) if report.claimed > 0 || report.dead > 0 => {
                            tracing::info!(
                                claimed = report.claimed,
                                sent = report.sent,
                                retried = report.retried,
                                dead = report.dead,
                                lost = report.lost,
                                "Dispatch sweep complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Dispatch sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Dispatcher stopped");
    }
}
