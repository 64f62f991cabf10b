// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Highlights: short reviewable facts extracted about an athlete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HighlightCategory {
    Training,
    Nutrition,
    Recovery,
    Psychology,
    Injury,
    Performance,
    Planning,
    Schedule,
    Admin,
    General,
}

impl HighlightCategory {
    /// Map free-form model output onto the closed category set.
    ///
    /// Accepts Spanish and English labels; anything unknown becomes
    /// [`HighlightCategory::General`].
    pub fn parse_loose(raw: &str) -> Self {
        let lower = raw.trim().to_lowercase();
        if let Ok(category) = lower.parse() {
            return category;
        }
        match lower.as_str() {
            "entrenamiento" | "workout" | "sesion" | "sesión" => Self::Training,
            "nutricion" | "nutrición" | "diet" | "dieta" => Self::Nutrition,
            "recuperacion" | "recuperación" | "sleep" | "sueño" => Self::Recovery,
            "psicologia" | "psicología" | "mental" | "mood" | "motivation" => Self::Psychology,
            "lesion" | "lesión" | "pain" | "dolor" | "health" => Self::Injury,
            "rendimiento" | "race" | "competition" => Self::Performance,
            "planificacion" | "planificación" | "plan" | "goal" | "goals" => Self::Planning,
            "calendario" | "agenda" | "availability" => Self::Schedule,
            "administrativo" | "payment" | "billing" => Self::Admin,
            _ => Self::General,
        }
    }

    /// Categories that count as negative signals for risk scoring.
    pub fn is_concerning(self) -> bool {
        matches!(self, Self::Injury | Self::Psychology)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HighlightStatus {
    Suggested,
    Accepted,
    Rejected,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HighlightOrigin {
    Ai,
    Manual,
}

impl HighlightOrigin {
    /// Initial review status for a new highlight of this origin.
    pub fn initial_status(self) -> HighlightStatus {
        match self {
            HighlightOrigin::Ai => HighlightStatus::Suggested,
            HighlightOrigin::Manual => HighlightStatus::Accepted,
        }
    }

    /// Manual highlights never enter the review queue.
    pub fn allows_status(self, status: HighlightStatus) -> bool {
        !(self == HighlightOrigin::Manual && status == HighlightStatus::Suggested)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Highlight {
    pub id: i64,
    pub athlete_id: i64,
    /// `None` for manually authored highlights
    pub source_message_id: Option<i64>,
    pub text: String,
    pub category: HighlightCategory,
    pub status: HighlightStatus,
    pub origin: HighlightOrigin,
    /// Confidence in `[0, 1]`
    pub score: f64,
    pub pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Highlight proposed by the completion collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightCandidate {
    pub text: String,
    pub category: HighlightCategory,
    pub score: f64,
}

/// Fields for inserting a highlight.
#[derive(Debug, Clone)]
pub struct NewHighlight {
    pub athlete_id: i64,
    pub source_message_id: Option<i64>,
    pub text: String,
    pub category: HighlightCategory,
    pub origin: HighlightOrigin,
    pub score: f64,
    pub pinned: bool,
}

/// Partial update applied by a reviewer.
#[derive(Debug, Clone, Default)]
pub struct HighlightUpdate {
    pub status: Option<HighlightStatus>,
    pub text: Option<String>,
    pub category: Option<HighlightCategory>,
    pub pinned: Option<bool>,
    pub reviewed_by: Option<String>,
}
