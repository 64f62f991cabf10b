// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Channel adapters.
//!
//! Each channel module owns two directions:
//! - parsing its webhook payload (or form) into [`RawEvent`]s
//! - delivering outbound text through a [`ChannelSender`]
//!
//! Inbound audio is downloaded through [`media::MediaResolver`].

pub mod email;
pub mod manual;
pub mod media;
pub mod telegram;
pub mod whatsapp;

use crate::config::Config;
use crate::error::SendError;
use crate::models::{Athlete, Channel, OutboxPayload};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Outbound delivery through one channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    /// Deliver `payload` to `recipient` (the channel's handle for the athlete).
    async fn send(&self, recipient: &str, payload: &OutboxPayload) -> Result<(), SendError>;
}

/// Senders by channel.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Production senders for every channel that can send.
    pub fn from_config(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.dispatch.send_timeout)
            .build()
            .unwrap_or_default();
        Self::new()
            .with(Arc::new(whatsapp::WhatsAppSender::new(
                http.clone(),
                &config.whatsapp,
            )))
            .with(Arc::new(telegram::TelegramSender::new(
                http.clone(),
                &config.telegram,
            )))
            .with(Arc::new(email::EmailSender::new(http, &config.email)))
    }

    pub fn with(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelSender>> {
        self.senders.get(&channel).cloned()
    }
}

/// The athlete's handle on `channel`, if one is on file.
pub fn recipient_for(channel: Channel, athlete: &Athlete) -> Option<String> {
    let handle = match channel {
        Channel::Whatsapp => athlete.phone.clone(),
        Channel::Telegram => athlete.telegram_user_id.clone(),
        Channel::Email => athlete.email.clone(),
        Channel::Manual => None,
    };
    handle.filter(|h| !h.trim().is_empty())
}

/// Map a transport-level failure to a send error.
///
/// Timeouts and connection failures are retryable; anything else (for
/// example an unbuildable request) is not.
pub(crate) fn transport_error(e: reqwest::Error) -> SendError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        SendError::Retryable(e.to_string())
    } else {
        SendError::Permanent(e.to_string())
    }
}

/// Map a provider response to a send result.
pub(crate) async fn check_send_response(response: reqwest::Response) -> Result<(), SendError> {
    if response.status().is_success() {
        return Ok(());
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(SendError::from_status(status, body))
}

/// Constant-time comparison of a shared secret header.
pub(crate) fn secret_matches(expected: &str, provided: Option<&str>) -> bool {
    match provided {
        Some(provided) if !expected.is_empty() => {
            expected.as_bytes().ct_eq(provided.as_bytes()).into()
        }
        _ => false,
    }
}
