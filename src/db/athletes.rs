// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Athlete lookups used by identity resolution.

use super::{ts_col, Database};
use crate::error::AppError;
use crate::models::{Athlete, NewAthlete};
use crate::time_utils::format_db_timestamp;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

const ATHLETE_COLUMNS: &str =
    "id, name, phone, telegram_user_id, email, sport, level, created_at";

fn athlete_from_row(row: &Row<'_>) -> rusqlite::Result<Athlete> {
    Ok(Athlete {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        telegram_user_id: row.get(3)?,
        email: row.get(4)?,
        sport: row.get(5)?,
        level: row.get(6)?,
        created_at: ts_col(row, 7)?,
    })
}

impl Database {
    pub async fn insert_athlete(&self, athlete: NewAthlete) -> Result<Athlete, AppError> {
        let created_at = format_db_timestamp(Utc::now());
        let email = athlete.email.map(|e| e.trim().to_lowercase());
        let athlete = self
            .conn
            .call(move |conn| -> Result<Athlete, rusqlite::Error> {
                conn.execute(
                    "INSERT INTO athletes (name, phone, telegram_user_id, email, sport, level, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        athlete.name,
                        athlete.phone,
                        athlete.telegram_user_id,
                        email,
                        athlete.sport,
                        athlete.level,
                        created_at
                    ],
                )?;
                let id = conn.last_insert_rowid();
                conn.query_row(
                    &format!("SELECT {} FROM athletes WHERE id = ?1", ATHLETE_COLUMNS),
                    params![id],
                    athlete_from_row,
                )
            })
            .await?;
        Ok(athlete)
    }

    pub async fn get_athlete(&self, id: i64) -> Result<Option<Athlete>, AppError> {
        let athlete = self
            .conn
            .call(move |conn| -> Result<Option<Athlete>, rusqlite::Error> {
                conn.query_row(
                    &format!("SELECT {} FROM athletes WHERE id = ?1", ATHLETE_COLUMNS),
                    params![id],
                    athlete_from_row,
                )
                .optional()
            })
            .await?;
        Ok(athlete)
    }

    pub async fn list_athlete_ids(&self) -> Result<Vec<i64>, AppError> {
        let ids = self
            .conn
            .call(|conn| -> Result<Vec<i64>, rusqlite::Error> {
                let mut stmt = conn.prepare("SELECT id FROM athletes ORDER BY id")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            })
            .await?;
        Ok(ids)
    }

    /// All `(athlete_id, phone)` pairs with a phone on file.
    ///
    /// Stored phones are free text; callers compare normalized digits.
    pub async fn athlete_phones(&self) -> Result<Vec<(i64, String)>, AppError> {
        let phones = self
            .conn
            .call(|conn| -> Result<Vec<(i64, String)>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, phone FROM athletes
                     WHERE phone IS NOT NULL AND phone != ''
                     ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect()
            })
            .await?;
        Ok(phones)
    }

    pub async fn find_athlete_by_telegram_id(
        &self,
        user_id: &str,
    ) -> Result<Option<i64>, AppError> {
        let user_id = user_id.to_string();
        let id = self
            .conn
            .call(move |conn| -> Result<Option<i64>, rusqlite::Error> {
                conn.query_row(
                    "SELECT id FROM athletes WHERE telegram_user_id = ?1 ORDER BY id LIMIT 1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        Ok(id)
    }

    pub async fn find_athlete_by_email(&self, email: &str) -> Result<Option<i64>, AppError> {
        let email = email.trim().to_lowercase();
        let id = self
            .conn
            .call(move |conn| -> Result<Option<i64>, rusqlite::Error> {
                conn.query_row(
                    "SELECT id FROM athletes WHERE lower(email) = ?1 ORDER BY id LIMIT 1",
                    params![email],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        Ok(id)
    }
}
