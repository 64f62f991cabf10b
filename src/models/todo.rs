// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Actionable follow-ups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
pub enum TodoPriority {
    P1,
    P2,
    P3,
}

impl TodoPriority {
    /// Weight of an overdue to-do of this priority in the risk score.
    pub fn overdue_weight(self) -> f64 {
        match self {
            TodoPriority::P1 => 1.0,
            TodoPriority::P2 => 0.6,
            TodoPriority::P3 => 0.3,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TodoStatus {
    Backlog,
    Doing,
    Done,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TodoCreator {
    Coach,
    Athlete,
    Ai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub id: i64,
    pub athlete_id: i64,
    pub source_message_id: Option<i64>,
    pub title: String,
    pub details: String,
    pub priority: TodoPriority,
    pub status: TodoStatus,
    pub due_at: Option<DateTime<Utc>>,
    pub created_by: TodoCreator,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTodo {
    pub athlete_id: i64,
    pub source_message_id: Option<i64>,
    pub title: String,
    pub details: String,
    pub priority: TodoPriority,
    pub due_at: Option<DateTime<Utc>>,
    pub created_by: TodoCreator,
}

#[derive(Debug, Clone, Default)]
pub struct TodoUpdate {
    pub title: Option<String>,
    pub details: Option<String>,
    pub priority: Option<TodoPriority>,
    pub status: Option<TodoStatus>,
    /// `Some(None)` clears the due date
    pub due_at: Option<Option<DateTime<Utc>>>,
}

/// To-do proposed by the completion collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct TodoCandidate {
    pub title: String,
    pub details: String,
    pub due_at: Option<DateTime<Utc>>,
}
