// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! To-do storage. Every write is audited.

use super::audit::insert_audit;
use super::{enum_col, opt_ts_col, ts_col, Database};
use crate::error::AppError;
use crate::models::{AuditRecord, NewTodo, Todo, TodoStatus, TodoUpdate};
use crate::time_utils::format_db_timestamp;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::json;

const TODO_COLUMNS: &str = "id, athlete_id, source_message_id, title, details, priority, \
     status, due_at, created_by, created_at, updated_at";

fn todo_from_row(row: &Row<'_>) -> rusqlite::Result<Todo> {
    Ok(Todo {
        id: row.get(0)?,
        athlete_id: row.get(1)?,
        source_message_id: row.get(2)?,
        title: row.get(3)?,
        details: row.get(4)?,
        priority: enum_col(row, 5)?,
        status: enum_col(row, 6)?,
        due_at: opt_ts_col(row, 7)?,
        created_by: enum_col(row, 8)?,
        created_at: ts_col(row, 9)?,
        updated_at: ts_col(row, 10)?,
    })
}

fn select_todo(conn: &Connection, id: i64) -> rusqlite::Result<Option<Todo>> {
    conn.query_row(
        &format!("SELECT {} FROM todos WHERE id = ?1", TODO_COLUMNS),
        params![id],
        todo_from_row,
    )
    .optional()
}

impl Database {
    /// Insert a to-do in `backlog`.
    pub async fn insert_todo(
        &self,
        todo: NewTodo,
        actor: String,
        now: DateTime<Utc>,
    ) -> Result<Todo, AppError> {
        let todo = self
            .conn
            .call(move |conn| -> Result<Todo, rusqlite::Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO todos (athlete_id, source_message_id, title, details, priority,
                         status, due_at, created_by, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'backlog', ?6, ?7, ?8, ?8)",
                    params![
                        todo.athlete_id,
                        todo.source_message_id,
                        todo.title,
                        todo.details,
                        todo.priority.to_string(),
                        todo.due_at.map(format_db_timestamp),
                        todo.created_by.to_string(),
                        format_db_timestamp(now)
                    ],
                )?;
                let id = tx.last_insert_rowid();
                insert_audit(
                    &tx,
                    &AuditRecord::new(actor, "todo.create", "todo", id).with_detail(json!({
                        "athlete_id": todo.athlete_id,
                        "source_message_id": todo.source_message_id,
                        "priority": todo.priority,
                        "created_by": todo.created_by,
                    })),
                    now,
                )?;
                let row = tx.query_row(
                    &format!("SELECT {} FROM todos WHERE id = ?1", TODO_COLUMNS),
                    params![id],
                    todo_from_row,
                )?;
                tx.commit()?;
                Ok(row)
            })
            .await?;
        Ok(todo)
    }

    pub async fn get_todo(&self, id: i64) -> Result<Option<Todo>, AppError> {
        let todo = self
            .conn
            .call(move |conn| -> Result<Option<Todo>, rusqlite::Error> { select_todo(conn, id) })
            .await?;
        Ok(todo)
    }

    /// To-dos created from one source message.
    pub async fn todos_for_message(&self, message_id: i64) -> Result<Vec<Todo>, AppError> {
        let todos = self
            .conn
            .call(move |conn| -> Result<Vec<Todo>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM todos WHERE source_message_id = ?1 ORDER BY id ASC",
                    TODO_COLUMNS
                ))?;
                let rows = stmt.query_map(params![message_id], todo_from_row)?;
                rows.collect()
            })
            .await?;
        Ok(todos)
    }

    /// To-dos of an athlete ordered by priority then due date.
    pub async fn list_todos(
        &self,
        athlete_id: i64,
        status: Option<TodoStatus>,
    ) -> Result<Vec<Todo>, AppError> {
        let status = status.map(|s| s.to_string());
        let todos = self
            .conn
            .call(move |conn| -> Result<Vec<Todo>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM todos
                     WHERE athlete_id = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY priority ASC, due_at IS NULL, due_at ASC, id ASC",
                    TODO_COLUMNS
                ))?;
                let rows = stmt.query_map(params![athlete_id, status], todo_from_row)?;
                rows.collect()
            })
            .await?;
        Ok(todos)
    }

    /// Apply a partial update. Returns `None` if the to-do does not exist.
    pub async fn update_todo(
        &self,
        id: i64,
        update: TodoUpdate,
        actor: String,
        now: DateTime<Utc>,
    ) -> Result<Option<Todo>, AppError> {
        let todo = self
            .conn
            .call(move |conn| -> Result<Option<Todo>, rusqlite::Error> {
                let tx = conn.transaction()?;
                let Some(before) = select_todo(&tx, id)? else {
                    return Ok(None);
                };

                let due_at = match update.due_at {
                    Some(due) => due,
                    None => before.due_at,
                };
                tx.execute(
                    "UPDATE todos SET
                         title = COALESCE(?1, title),
                         details = COALESCE(?2, details),
                         priority = COALESCE(?3, priority),
                         status = COALESCE(?4, status),
                         due_at = ?5,
                         updated_at = ?6
                     WHERE id = ?7",
                    params![
                        update.title,
                        update.details,
                        update.priority.map(|p| p.to_string()),
                        update.status.map(|s| s.to_string()),
                        due_at.map(format_db_timestamp),
                        format_db_timestamp(now),
                        id
                    ],
                )?;

                let mut detail = serde_json::Map::new();
                if let Some(status) = update.status {
                    detail.insert("status_from".into(), json!(before.status));
                    detail.insert("status_to".into(), json!(status));
                }
                if let Some(priority) = update.priority {
                    detail.insert("priority_from".into(), json!(before.priority));
                    detail.insert("priority_to".into(), json!(priority));
                }
                if update.title.is_some() || update.details.is_some() {
                    detail.insert("content_edited".into(), json!(true));
                }
                if update.due_at.is_some() {
                    detail.insert("due_at".into(), json!(due_at));
                }
                insert_audit(
                    &tx,
                    &AuditRecord::new(actor, "todo.update", "todo", id)
                        .with_detail(serde_json::Value::Object(detail)),
                    now,
                )?;

                let todo = select_todo(&tx, id)?;
                tx.commit()?;
                Ok(todo)
            })
            .await?;
        Ok(todo)
    }
}
