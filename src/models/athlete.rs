// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Athlete record as seen by the ingestion core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Athlete with the contact handles used for identity matching.
///
/// Athletes are created and edited by the coaching application; this crate
/// only reads them (and writes them in tests and seeding).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Athlete {
    pub id: i64,
    pub name: String,
    /// E.164 phone number
    pub phone: Option<String>,
    /// Telegram bot user id
    pub telegram_user_id: Option<String>,
    /// Lower-cased email address
    pub email: Option<String>,
    pub sport: Option<String>,
    pub level: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for creating an athlete.
#[derive(Debug, Clone, Default)]
pub struct NewAthlete {
    pub name: String,
    pub phone: Option<String>,
    pub telegram_user_id: Option<String>,
    pub email: Option<String>,
    pub sport: Option<String>,
    pub level: Option<String>,
}
