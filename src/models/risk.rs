// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Risk assessment results.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One weighted input to the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    /// Normalized signal in `[0, 1]`
    pub signal: f64,
    pub weight: f64,
    /// `signal * weight * 100`
    pub contribution: f64,
    pub evidence: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub athlete_id: i64,
    pub level: RiskLevel,
    /// Smoothed score, rounded for display
    pub score: f64,
    pub raw_score: f64,
    pub smoothed_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_score: Option<f64>,
    pub evidence: Vec<String>,
    pub factors: Vec<RiskFactor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_since_contact: Option<f64>,
    pub overdue_count: u32,
    pub negative_highlight_ratio: f64,
    pub sentiment_trend: f64,
    pub pain_mentions: u32,
    pub score_date: NaiveDate,
    pub computed_at: DateTime<Utc>,
}
