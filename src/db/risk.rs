// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Risk engine reads and the per-day score history.

use super::{enum_col, json_col, opt_ts_col, Database};
use crate::error::AppError;
use crate::models::{HighlightCategory, RiskAssessment, TodoPriority};
use crate::time_utils::format_db_timestamp;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};

/// Stored data the risk score is computed from.
#[derive(Debug, Clone, Default)]
pub struct RiskInputs {
    pub last_inbound_at: Option<DateTime<Utc>>,
    /// Priorities of open to-dos past their due date
    pub overdue: Vec<TodoPriority>,
    /// Non-rejected highlights in the trailing window
    pub recent_highlights: Vec<(String, HighlightCategory)>,
    /// Latest inbound message bodies, newest first
    pub recent_inbound: Vec<String>,
}

impl Database {
    pub async fn risk_inputs(
        &self,
        athlete_id: i64,
        now: DateTime<Utc>,
        highlights_since: DateTime<Utc>,
        inbound_samples: usize,
    ) -> Result<RiskInputs, AppError> {
        let now = format_db_timestamp(now);
        let since = format_db_timestamp(highlights_since);
        let inputs = self
            .conn
            .call(move |conn| -> Result<RiskInputs, rusqlite::Error> {
                let last_inbound_at = conn
                    .query_row(
                        "SELECT MAX(received_at) FROM messages
                         WHERE athlete_id = ?1 AND direction = 'inbound'
                           AND deleted_at IS NULL AND received_at <= ?2",
                        params![athlete_id, now],
                        |row| opt_ts_col(row, 0),
                    )
                    .optional()?
                    .flatten();

                let overdue = {
                    let mut stmt = conn.prepare(
                        "SELECT priority FROM todos
                         WHERE athlete_id = ?1 AND status != 'done'
                           AND due_at IS NOT NULL AND due_at < ?2",
                    )?;
                    let rows = stmt.query_map(params![athlete_id, now], |row| enum_col(row, 0))?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };

                let recent_highlights = {
                    let mut stmt = conn.prepare(
                        "SELECT text, category FROM highlights
                         WHERE athlete_id = ?1 AND status != 'rejected'
                           AND created_at >= ?2 AND created_at <= ?3",
                    )?;
                    let rows = stmt.query_map(params![athlete_id, since, now], |row| {
                        Ok((row.get(0)?, enum_col(row, 1)?))
                    })?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };

                let recent_inbound = {
                    let mut stmt = conn.prepare(
                        "SELECT body FROM messages
                         WHERE athlete_id = ?1 AND direction = 'inbound'
                           AND deleted_at IS NULL AND received_at <= ?2
                         ORDER BY received_at DESC, id DESC
                         LIMIT ?3",
                    )?;
                    let rows = stmt.query_map(
                        params![athlete_id, now, inbound_samples as i64],
                        |row| row.get(0),
                    )?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };

                Ok(RiskInputs {
                    last_inbound_at,
                    overdue,
                    recent_highlights,
                    recent_inbound,
                })
            })
            .await?;
        Ok(inputs)
    }

    /// Today's stored assessment, if one was computed.
    pub async fn latest_risk(
        &self,
        athlete_id: i64,
        date: NaiveDate,
    ) -> Result<Option<RiskAssessment>, AppError> {
        let date = date.to_string();
        let stored = self
            .conn
            .call(move |conn| -> Result<Option<RiskAssessment>, rusqlite::Error> {
                conn.query_row(
                    "SELECT assessment FROM athlete_risk_scores
                     WHERE athlete_id = ?1 AND score_date = ?2",
                    params![athlete_id, date],
                    |row| json_col(row, 0),
                )
                .optional()
            })
            .await?;
        Ok(stored)
    }

    /// Latest smoothed score from a day before `date`.
    pub async fn previous_risk_score(
        &self,
        athlete_id: i64,
        date: NaiveDate,
    ) -> Result<Option<f64>, AppError> {
        let date = date.to_string();
        let score = self
            .conn
            .call(move |conn| -> Result<Option<f64>, rusqlite::Error> {
                conn.query_row(
                    "SELECT smoothed_score FROM athlete_risk_scores
                     WHERE athlete_id = ?1 AND score_date < ?2
                     ORDER BY score_date DESC
                     LIMIT 1",
                    params![athlete_id, date],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        Ok(score)
    }

    /// Store an assessment as its day's score, replacing an earlier one from
    /// the same day.
    pub async fn save_risk(&self, assessment: RiskAssessment) -> Result<RiskAssessment, AppError> {
        let json = serde_json::to_string(&assessment).map_err(|e| AppError::Internal(e.into()))?;
        let row = assessment.clone();
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO athlete_risk_scores (athlete_id, score_date, raw_score,
                         smoothed_score, level, assessment, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(athlete_id, score_date) DO UPDATE SET
                         raw_score = excluded.raw_score,
                         smoothed_score = excluded.smoothed_score,
                         level = excluded.level,
                         assessment = excluded.assessment,
                         computed_at = excluded.computed_at",
                    params![
                        row.athlete_id,
                        row.score_date.to_string(),
                        row.raw_score,
                        row.smoothed_score,
                        row.level.to_string(),
                        json,
                        format_db_timestamp(row.computed_at)
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(assessment)
    }
}
