// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer (SQLite).
//!
//! All statements run on the single background thread owned by
//! `tokio_rusqlite::Connection`. Typed operations live in the submodules as
//! `impl Database` blocks, one per table family:
//! - athletes (identity handles)
//! - messages, conversations and reply drafts
//! - highlights and to-dos
//! - outbox
//! - audit log
//! - daily risk score history

mod athletes;
mod audit;
mod highlights;
mod messages;
mod outbox;
mod risk;
mod todos;

pub use messages::InboundInsert;
pub use outbox::{ClaimBatch, OutboundRequest};
pub use risk::RiskInputs;

use crate::error::AppError;
use crate::time_utils::parse_rfc3339;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use std::str::FromStr;
use std::time::Duration;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// SQLite database handle. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (or create) the database at `path` and apply pending migrations.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub async fn open(path: &str) -> Result<Self, AppError> {
        let in_memory = path == ":memory:";
        let conn = if in_memory {
            tokio_rusqlite::Connection::open_in_memory().await?
        } else {
            tokio_rusqlite::Connection::open(path).await?
        };

        conn.call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.busy_timeout(Duration::from_secs(5))?;
            if !in_memory {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            }
            Ok(())
        })
        .await?;

        conn.call(|conn| -> Result<(), refinery::Error> {
            embedded::migrations::runner().run(conn)?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::Database(format!("Migration failed: {}", e)))?;

        tracing::info!(path, "Database opened");
        Ok(Self { conn })
    }

    /// Fresh in-memory database with the full schema.
    pub async fn open_in_memory() -> Result<Self, AppError> {
        Self::open(":memory:").await
    }

    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }
}

/// Read a text column holding a strum-encoded enum.
pub(crate) fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a required timestamp column.
pub(crate) fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

/// Read a nullable timestamp column.
pub(crate) fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_ts(idx, &r)).transpose()
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_rfc3339(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp: {}", raw).into(),
        )
    })
}

/// Read a JSON text column.
pub(crate) fn json_col<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// True if `e` is a UNIQUE or PRIMARY KEY constraint violation.
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.code == rusqlite::ErrorCode::ConstraintViolation
                && (err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_applies_schema() {
        let db = Database::open_in_memory().await.unwrap();
        let tables: Vec<String> = db
            .connection()
            .call(|conn| -> Result<Vec<String>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            })
            .await
            .unwrap();

        for table in [
            "athletes",
            "conversations",
            "messages",
            "highlights",
            "todos",
            "reply_drafts",
            "outbox",
            "audit_log",
            "athlete_risk_scores",
        ] {
            assert!(tables.iter().any(|t| t == table), "missing table {}", table);
        }
    }
}
