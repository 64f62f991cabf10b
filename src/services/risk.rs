// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Risk Scoring Engine.
//!
//! Scoring is a pure function of [`RiskInputs`] and the previous day's
//! score. [`RiskEngine::assess`] recomputes from stored data on every call and
//! keeps one history row per athlete per UTC day, overwritten by later
//! assessments that day. Smoothing only looks at earlier days, so repeated
//! queries over unchanged data return the same score.

use crate::config::RiskConfig;
use crate::db::{Database, RiskInputs};
use crate::error::AppError;
use crate::models::{RiskAssessment, RiskFactor, RiskLevel, TodoPriority};
use chrono::{DateTime, Utc};

const WEIGHT_INACTIVITY: f64 = 0.40;
const WEIGHT_OVERDUE: f64 = 0.30;
const WEIGHT_NEGATIVE_HIGHLIGHTS: f64 = 0.15;
const WEIGHT_SENTIMENT: f64 = 0.10;
const WEIGHT_PAIN: f64 = 0.05;

/// Days of silence that carry no risk
const INACTIVITY_GRACE_DAYS: f64 = 3.0;
/// Assumed silence for an athlete who never wrote
const NEVER_CONTACTED_DAYS: f64 = 30.0;
/// Weighted overdue load at which the signal saturates
const OVERDUE_SATURATION: f64 = 2.0;
/// Pain mentions at which the signal saturates
const PAIN_SATURATION: f64 = 3.0;

const NEGATIVE_WORDS: &[&str] = &[
    "mal", "fatal", "cansado", "cansada", "agotado", "agotada", "triste", "desmotivado",
    "desmotivada", "estresado", "estresada", "estrés", "estres", "ansiedad", "frustrado",
    "frustrada", "enfermo", "enferma", "dolor", "duele", "lesión", "lesion", "peor", "bad",
    "awful", "tired", "exhausted", "sad", "stressed", "anxious", "frustrated", "sick", "worse",
    "pain", "hurt", "hurts", "injury", "injured",
];

const POSITIVE_WORDS: &[&str] = &[
    "bien", "genial", "feliz", "contento", "contenta", "motivado", "motivada", "fuerte",
    "excelente", "perfecto", "mejor", "great", "good", "happy", "strong", "motivated",
    "excellent", "perfect", "better",
];

const PAIN_WORDS: &[&str] = &[
    "dolor", "duele", "duelen", "molestia", "molestias", "lesión", "lesion", "lesionado",
    "lesionada", "pain", "hurt", "hurts", "injury", "injured", "sore", "ache",
];

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn contains_any(text: &str, lexicon: &[&str]) -> bool {
    words(text).any(|w| lexicon.contains(&w.as_str()))
}

/// Keyword sentiment of one message: -1, 0 or +1.
pub fn message_sentiment(text: &str) -> f64 {
    let (mut negative, mut positive) = (0, 0);
    for word in words(text) {
        if NEGATIVE_WORDS.contains(&word.as_str()) {
            negative += 1;
        } else if POSITIVE_WORDS.contains(&word.as_str()) {
            positive += 1;
        }
    }
    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => 1.0,
        std::cmp::Ordering::Less => -1.0,
        std::cmp::Ordering::Equal => 0.0,
    }
}

pub fn inactivity_signal(days: f64) -> f64 {
    1.0 - (-(days - INACTIVITY_GRACE_DAYS).max(0.0) / 3.0).exp()
}

pub fn overdue_signal(overdue: &[TodoPriority]) -> f64 {
    let load: f64 = overdue.iter().map(|p| p.overdue_weight()).sum();
    (load / OVERDUE_SATURATION).min(1.0)
}

pub fn level_for(score: f64, config: &RiskConfig) -> RiskLevel {
    if score >= config.high_threshold {
        RiskLevel::High
    } else if score >= config.medium_threshold {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn factor(name: &str, signal: f64, weight: f64, evidence: String) -> RiskFactor {
    RiskFactor {
        name: name.to_string(),
        signal,
        weight,
        contribution: signal * weight * 100.0,
        evidence,
    }
}

/// Score one athlete from stored inputs.
pub fn score_risk(
    athlete_id: i64,
    inputs: &RiskInputs,
    previous_score: Option<f64>,
    config: &RiskConfig,
    now: DateTime<Utc>,
) -> RiskAssessment {
    let days_since_contact = inputs
        .last_inbound_at
        .map(|at| ((now - at).num_seconds().max(0) as f64) / 86_400.0);
    let inactivity = inactivity_signal(days_since_contact.unwrap_or(NEVER_CONTACTED_DAYS));
    let inactivity_evidence = match days_since_contact {
        Some(days) => format!("No message from the athlete for {} days", days.floor() as i64),
        None => "The athlete has never written".to_string(),
    };

    let overdue = overdue_signal(&inputs.overdue);
    let p1 = inputs
        .overdue
        .iter()
        .filter(|p| **p == TodoPriority::P1)
        .count();
    let overdue_evidence = format!(
        "{} overdue to-dos ({} P1)",
        inputs.overdue.len(),
        p1
    );

    let negative = inputs
        .recent_highlights
        .iter()
        .filter(|(text, category)| category.is_concerning() || contains_any(text, NEGATIVE_WORDS))
        .count();
    let negative_ratio = if inputs.recent_highlights.is_empty() {
        0.0
    } else {
        negative as f64 / inputs.recent_highlights.len() as f64
    };
    let negative_evidence = format!(
        "{} of {} recent highlights are concerning",
        negative,
        inputs.recent_highlights.len()
    );

    let samples: Vec<f64> = inputs
        .recent_inbound
        .iter()
        .take(config.sentiment_samples.max(1))
        .map(|body| message_sentiment(body))
        .collect();
    let sentiment_trend = if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    };
    let sentiment = (-sentiment_trend).max(0.0);
    let sentiment_evidence = format!(
        "Negative tone in recent messages (trend {:.2})",
        sentiment_trend
    );

    let pain_mentions = inputs
        .recent_inbound
        .iter()
        .take(config.sentiment_samples.max(1))
        .filter(|body| contains_any(body, PAIN_WORDS))
        .count() as u32;
    let pain = (pain_mentions as f64 / PAIN_SATURATION).min(1.0);
    let pain_evidence = format!("Pain or injury mentioned in {} recent messages", pain_mentions);

    let mut factors = vec![
        factor("inactivity", inactivity, WEIGHT_INACTIVITY, inactivity_evidence),
        factor("overdue_todos", overdue, WEIGHT_OVERDUE, overdue_evidence),
        factor(
            "negative_highlights",
            negative_ratio,
            WEIGHT_NEGATIVE_HIGHLIGHTS,
            negative_evidence,
        ),
        factor("sentiment_trend", sentiment, WEIGHT_SENTIMENT, sentiment_evidence),
        factor("pain_mentions", pain, WEIGHT_PAIN, pain_evidence),
    ];
    let raw_score: f64 = factors.iter().map(|f| f.contribution).sum();
    let smoothed_score = match previous_score {
        Some(previous) => {
            config.smoothing_alpha * raw_score + (1.0 - config.smoothing_alpha) * previous
        }
        None => raw_score,
    };

    factors.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));
    let evidence = factors
        .iter()
        .filter(|f| f.contribution > 0.0)
        .map(|f| f.evidence.clone())
        .collect();

    RiskAssessment {
        athlete_id,
        level: level_for(smoothed_score, config),
        score: round1(smoothed_score),
        raw_score: round1(raw_score),
        smoothed_score: round1(smoothed_score),
        previous_score,
        evidence,
        factors,
        days_since_contact: days_since_contact.map(round1),
        overdue_count: inputs.overdue.len() as u32,
        negative_highlight_ratio: negative_ratio,
        sentiment_trend,
        pain_mentions,
        score_date: now.date_naive(),
        computed_at: now,
    }
}

#[derive(Clone)]
pub struct RiskEngine {
    db: Database,
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(db: Database, config: RiskConfig) -> Self {
        Self { db, config }
    }

    /// Assess one athlete from current data and record it as today's score.
    pub async fn assess(&self, athlete_id: i64, now: DateTime<Utc>) -> Result<RiskAssessment, AppError> {
        let today = now.date_naive();
        if self.db.get_athlete(athlete_id).await?.is_none() {
            return Err(AppError::NotFound(format!("athlete {}", athlete_id)));
        }

        let inputs = self
            .db
            .risk_inputs(
                athlete_id,
                now,
                now - self.config.highlight_window,
                self.config.sentiment_samples,
            )
            .await?;
        let previous = self.db.previous_risk_score(athlete_id, today).await?;
        let assessment = score_risk(athlete_id, &inputs, previous, &self.config, now);

        tracing::info!(
            athlete_id,
            level = %assessment.level,
            raw_score = assessment.raw_score,
            smoothed_score = assessment.smoothed_score,
            "Risk score computed"
        );
        self.db.save_risk(assessment).await
    }

    /// Assess every athlete.
    pub async fn recompute_all(&self, now: DateTime<Utc>) -> Result<Vec<RiskAssessment>, AppError> {
        let mut assessments = Vec::new();
        for athlete_id in self.db.list_athlete_ids().await? {
            assessments.push(self.assess(athlete_id, now).await?);
        }
        Ok(assessments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HighlightCategory;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_silence_and_overdue_p1_is_high_risk() {
        let inputs = RiskInputs {
            last_inbound_at: Some(now() - Duration::days(20)),
            overdue: vec![TodoPriority::P1, TodoPriority::P1],
            recent_highlights: vec![],
            recent_inbound: vec!["Vale, mañana hago la serie".to_string()],
        };
        let a = score_risk(1, &inputs, None, &RiskConfig::default(), now());
        assert_eq!(a.level, RiskLevel::High);
        assert!(a.raw_score > 69.0 && a.raw_score < 70.0, "{}", a.raw_score);
        assert_eq!(a.evidence.len(), 2);
        assert!(a.evidence[0].contains("20 days"));
        assert!(a.evidence[1].contains("2 overdue"));
    }

    #[test]
    fn test_recent_contact_is_low_risk() {
        let inputs = RiskInputs {
            last_inbound_at: Some(now() - Duration::hours(6)),
            recent_inbound: vec!["Todo genial, me siento fuerte".to_string()],
            ..Default::default()
        };
        let a = score_risk(1, &inputs, None, &RiskConfig::default(), now());
        assert_eq!(a.level, RiskLevel::Low);
        assert_eq!(a.raw_score, 0.0);
        assert!(a.evidence.is_empty());
    }

    #[test]
    fn test_smoothing_against_previous_score() {
        let inputs = RiskInputs {
            last_inbound_at: Some(now() - Duration::hours(1)),
            ..Default::default()
        };
        let a = score_risk(1, &inputs, Some(80.0), &RiskConfig::default(), now());
        assert_eq!(a.raw_score, 0.0);
        assert_eq!(a.smoothed_score, 40.0);
        assert_eq!(a.level, RiskLevel::Medium);
    }

    #[test]
    fn test_text_signals() {
        assert_eq!(message_sentiment("Me duele la rodilla, fatal"), -1.0);
        assert_eq!(message_sentiment("Muy bien, genial"), 1.0);
        assert_eq!(message_sentiment("Mañana 10 km"), 0.0);

        let inputs = RiskInputs {
            last_inbound_at: Some(now()),
            recent_highlights: vec![
                ("Dolor en la rodilla".to_string(), HighlightCategory::Injury),
                ("Buen ritmo en series".to_string(), HighlightCategory::Training),
            ],
            recent_inbound: vec![
                "me duele el gemelo".to_string(),
                "sigue la molestia".to_string(),
                "bien".to_string(),
            ],
            ..Default::default()
        };
        let a = score_risk(1, &inputs, None, &RiskConfig::default(), now());
        assert_eq!(a.negative_highlight_ratio, 0.5);
        assert_eq!(a.pain_mentions, 2);
        assert_eq!(a.sentiment_trend, 0.0);
    }

    #[test]
    fn test_inactivity_grace_period() {
        assert_eq!(inactivity_signal(0.0), 0.0);
        assert_eq!(inactivity_signal(3.0), 0.0);
        assert!(inactivity_signal(6.0) > 0.6);
        assert!(inactivity_signal(30.0) > 0.99);
    }
}
