// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Check-in drafts for athletes the risk engine flags.

use super::{Channel, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Draft text for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDraft {
    pub channel: Channel,
    /// Email only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutreachNotes {
    pub tone: String,
    pub cta: String,
    pub reasoning: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachDraft {
    pub athlete_id: i64,
    pub language: String,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub drafts: Vec<ChannelDraft>,
    pub notes: OutreachNotes,
    /// Set when the model failed and the drafts are the stock check-in
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
    pub created_at: DateTime<Utc>,
}

impl OutreachDraft {
    pub fn for_channel(&self, channel: Channel) -> Option<&ChannelDraft> {
        self.drafts.iter().find(|d| d.channel == channel)
    }
}
