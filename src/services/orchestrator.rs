// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Action Orchestrator: best-effort enrichment of stored messages.
//!
//! Each requested action runs concurrently under its own timeout. A failing
//! action is logged and reported next to the others; it never rolls back
//! the message or another action's output.
//!
//! Outreach is the one athlete-level action: it drafts a check-in from the
//! current risk assessment instead of enriching a single message.

use crate::channels::recipient_for;
use crate::config::{EnrichmentConfig, OutreachConfig};
use crate::db::Database;
use crate::error::{AppError, CollaboratorError};
use crate::models::{
    Athlete, AuditRecord, Channel, Highlight, HighlightOrigin, HighlightStatus, Message,
    NewHighlight, NewTodo, OutreachDraft, ReplyDraft, RiskAssessment, RiskLevel, Todo,
    TodoCreator, TodoPriority,
};
use crate::services::completion::{CompletionClient, CompletionRequest};
use crate::services::prompts::{self, OutreachInput, OutreachText};
use crate::services::risk::RiskEngine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Resolved enrichment settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct EnrichmentPolicy {
    /// When false, [`Orchestrator::run`] performs no completion calls
    pub enabled: bool,
    pub highlight_context: usize,
    pub reply_context: usize,
    pub max_highlights: usize,
    pub similarity_threshold: f64,
    pub action_timeout: Duration,
}

impl From<&EnrichmentConfig> for EnrichmentPolicy {
    fn from(config: &EnrichmentConfig) -> Self {
        Self {
            enabled: config.enabled,
            highlight_context: config.highlight_context,
            reply_context: config.reply_context,
            max_highlights: config.max_highlights,
            similarity_threshold: config.similarity_threshold,
            action_timeout: config.action_timeout,
        }
    }
}

/// Caller-selected actions. Saving the message is implicit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ActionSet {
    #[serde(default)]
    pub generate_highlights: bool,
    #[serde(default)]
    pub suggest_reply: bool,
    #[serde(default)]
    pub maybe_create_todo: bool,
}

impl ActionSet {
    pub fn all() -> Self {
        Self {
            generate_highlights: true,
            suggest_reply: true,
            maybe_create_todo: true,
        }
    }

    /// Default action set for webhook-driven ingestion.
    pub fn for_webhooks(config: &EnrichmentConfig) -> Self {
        Self {
            generate_highlights: config.webhook_highlights,
            suggest_reply: config.webhook_reply,
            maybe_create_todo: config.webhook_todo,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.generate_highlights || self.suggest_reply || self.maybe_create_todo)
    }
}

/// Aggregate outcome of one orchestrator run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionsPerformed {
    pub highlights: Vec<Highlight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub todo: Option<Todo>,
    /// Per-action failures keyed by action name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
    /// Set when enrichment is globally disabled
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

/// Lower-cased, punctuation-free form used for similarity checks.
fn similarity_key(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// True if `candidate` is at least `threshold` similar to any of `existing`.
pub fn is_near_duplicate(candidate: &str, existing: &[String], threshold: f64) -> bool {
    let key = similarity_key(candidate);
    existing
        .iter()
        .any(|e| strsim::normalized_levenshtein(&key, &similarity_key(e)) >= threshold)
}

/// Messages of recent history handed to the outreach prompt
const OUTREACH_RECENT_MESSAGES: usize = 6;

/// Outcome of drafting outreach for every flagged athlete.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutreachBatch {
    pub assessed: usize,
    pub drafts: Vec<OutreachDraft>,
    /// Flagged athletes without a draft, keyed by athlete id
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub skipped: BTreeMap<i64, String>,
}

pub struct Orchestrator {
    db: Database,
    completion: Arc<dyn CompletionClient>,
    policy: EnrichmentPolicy,
    risk: RiskEngine,
    outreach: OutreachConfig,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        completion: Arc<dyn CompletionClient>,
        policy: EnrichmentPolicy,
        risk: RiskEngine,
        outreach: OutreachConfig,
    ) -> Self {
        Self {
            db,
            completion,
            policy,
            risk,
            outreach,
        }
    }

    pub fn policy(&self) -> &EnrichmentPolicy {
        &self.policy
    }

    /// Run the requested actions for a stored message.
    pub async fn run(&self, message: &Message, actions: ActionSet, actor: &str) -> ActionsPerformed {
        if !self.policy.enabled {
            if !actions.is_empty() {
                tracing::debug!(message_id = message.id, "Enrichment disabled, skipping actions");
            }
            return ActionsPerformed {
                disabled: true,
                ..Default::default()
            };
        }

        let highlights = async {
            if actions.generate_highlights {
                Some(self.generate_highlights(message, actor).await)
            } else {
                None
            }
        };
        let reply = async {
            if actions.suggest_reply {
                Some(self.suggest_reply(message).await)
            } else {
                None
            }
        };
        let todo = async {
            if actions.maybe_create_todo {
                Some(self.maybe_create_todo(message, actor).await)
            } else {
                None
            }
        };
        let (highlights, reply, todo) = tokio::join!(highlights, reply, todo);

        let mut performed = ActionsPerformed::default();
        match highlights {
            Some(Ok(list)) => performed.highlights = list,
            Some(Err(e)) => record_failure(&mut performed, "highlights", message.id, &e),
            None => {}
        }
        match reply {
            Some(Ok(text)) => performed.suggested_reply = Some(text),
            Some(Err(e)) => record_failure(&mut performed, "suggested_reply", message.id, &e),
            None => {}
        }
        match todo {
            Some(Ok(todo)) => performed.todo = todo,
            Some(Err(e)) => record_failure(&mut performed, "todo", message.id, &e),
            None => {}
        }
        performed
    }

    async fn timed<T>(
        &self,
        fut: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.policy.action_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(self.policy.action_timeout).into()),
        }
    }

    async fn context_for(&self, message: &Message, limit: usize) -> Result<Vec<Message>, AppError> {
        match message.conversation_id {
            Some(conversation_id) if limit > 0 => {
                self.db
                    .context_messages(conversation_id, message.id, limit)
                    .await
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Suggest highlights for a message and store the new ones as `suggested`.
    ///
    /// Suggestions too similar to the athlete's existing suggested or
    /// accepted highlights are dropped.
    pub async fn generate_highlights(
        &self,
        message: &Message,
        actor: &str,
    ) -> Result<Vec<Highlight>, AppError> {
        self.timed(self.generate_highlights_inner(message, actor)).await
    }

    async fn generate_highlights_inner(
        &self,
        message: &Message,
        actor: &str,
    ) -> Result<Vec<Highlight>, AppError> {
        let athlete_id = message.athlete_id.ok_or_else(|| {
            AppError::BadRequest(format!("message {} is not linked to an athlete", message.id))
        })?;

        let context = self.context_for(message, self.policy.highlight_context).await?;
        let request = prompts::highlights_request(&context, message, self.policy.max_highlights);
        let raw = self.completion.complete(request).await?;
        let candidates = prompts::parse_highlights(&raw, self.policy.max_highlights)?;

        let mut existing = self.db.active_highlight_texts(athlete_id).await?;
        let mut created = Vec::new();
        for candidate in candidates {
            if is_near_duplicate(&candidate.text, &existing, self.policy.similarity_threshold) {
                tracing::debug!(
                    athlete_id,
                    message_id = message.id,
                    text = %candidate.text,
                    "Skipping near-duplicate highlight"
                );
                continue;
            }
            existing.push(candidate.text.clone());
            let highlight = self
                .db
                .insert_highlight(
                    NewHighlight {
                        athlete_id,
                        source_message_id: Some(message.id),
                        text: candidate.text,
                        category: candidate.category,
                        origin: HighlightOrigin::Ai,
                        score: candidate.score,
                        pinned: false,
                    },
                    actor.to_string(),
                    Utc::now(),
                )
                .await?;
            created.push(highlight);
        }

        tracing::info!(
            athlete_id,
            message_id = message.id,
            count = created.len(),
            "Highlights suggested"
        );
        Ok(created)
    }

    /// Existing pending suggestions for the message, or fresh ones when
    /// there are none or `overwrite` is set.
    pub async fn highlights_for_message(
        &self,
        message: &Message,
        overwrite: bool,
        actor: &str,
    ) -> Result<Vec<Highlight>, AppError> {
        if !overwrite {
            let existing = self.db.suggested_highlights_for_message(message.id).await?;
            if !existing.is_empty() {
                return Ok(existing);
            }
        }
        self.generate_highlights(message, actor).await
    }

    /// Draft a reply and cache it against the message. Never sends it.
    pub async fn suggest_reply(&self, message: &Message) -> Result<String, AppError> {
        self.timed(self.suggest_reply_inner(message)).await
    }

    async fn suggest_reply_inner(&self, message: &Message) -> Result<String, AppError> {
        let limit = message.channel.message_limit();
        let context = self.context_for(message, self.policy.reply_context).await?;
        let raw = self
            .completion
            .complete(prompts::reply_request(&context, message, limit))
            .await?;
        let text = prompts::parse_reply(&raw, limit)?;

        self.db
            .save_reply_draft(ReplyDraft {
                message_id: message.id,
                channel: message.channel,
                text: text.clone(),
                created_at: Utc::now(),
            })
            .await?;
        tracing::info!(message_id = message.id, chars = text.chars().count(), "Reply drafted");
        Ok(text)
    }

    /// Create a P2 backlog to-do if the message holds an actionable request.
    ///
    /// A message yields at most one AI to-do; later calls return it.
    pub async fn maybe_create_todo(
        &self,
        message: &Message,
        actor: &str,
    ) -> Result<Option<Todo>, AppError> {
        self.timed(self.maybe_create_todo_inner(message, actor)).await
    }

    async fn maybe_create_todo_inner(
        &self,
        message: &Message,
        actor: &str,
    ) -> Result<Option<Todo>, AppError> {
        let athlete_id = message.athlete_id.ok_or_else(|| {
            AppError::BadRequest(format!("message {} is not linked to an athlete", message.id))
        })?;

        if let Some(existing) = self
            .db
            .todos_for_message(message.id)
            .await?
            .into_iter()
            .find(|t| t.created_by == TodoCreator::Ai)
        {
            return Ok(Some(existing));
        }

        let raw = self.completion.complete(prompts::todo_request(message)).await?;
        let Some(candidate) = prompts::parse_todo(&raw)? else {
            tracing::debug!(message_id = message.id, "No actionable request detected");
            return Ok(None);
        };

        let todo = self
            .db
            .insert_todo(
                NewTodo {
                    athlete_id,
                    source_message_id: Some(message.id),
                    title: candidate.title,
                    details: candidate.details,
                    priority: TodoPriority::P2,
                    due_at: candidate.due_at,
                    created_by: TodoCreator::Ai,
                },
                actor.to_string(),
                Utc::now(),
            )
            .await?;
        tracing::info!(athlete_id, message_id = message.id, todo_id = todo.id, "To-do created");
        Ok(Some(todo))
    }

    /// Draft a check-in for one athlete on each reachable channel in `channels`.
    ///
    /// The athlete is re-assessed first. If the model fails the drafts fall
    /// back to a stock check-in, marked `fallback`. Nothing is sent.
    pub async fn draft_outreach(
        &self,
        athlete_id: i64,
        channels: &[Channel],
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<OutreachDraft, AppError> {
        let athlete = self
            .db
            .get_athlete(athlete_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("athlete {}", athlete_id)))?;
        let reachable = reachable_channels(&athlete, channels);
        if reachable.is_empty() {
            return Err(AppError::BadRequest(format!(
                "athlete {} has no contact on the requested channels",
                athlete_id
            )));
        }
        let risk = self.risk.assess(athlete_id, now).await?;
        self.draft_for(&athlete, &risk, &reachable, actor, now).await
    }

    /// Assess every athlete and draft outreach for those at `min_level` or above.
    pub async fn draft_outreach_for_at_risk(
        &self,
        min_level: RiskLevel,
        channels: &[Channel],
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<OutreachBatch, AppError> {
        let mut batch = OutreachBatch::default();
        for risk in self.risk.recompute_all(now).await? {
            batch.assessed += 1;
            if risk.level < min_level {
                continue;
            }
            let Some(athlete) = self.db.get_athlete(risk.athlete_id).await? else {
                continue;
            };
            let reachable = reachable_channels(&athlete, channels);
            if reachable.is_empty() {
                batch
                    .skipped
                    .insert(athlete.id, "no contact on the requested channels".to_string());
                continue;
            }
            let draft = self.draft_for(&athlete, &risk, &reachable, actor, now).await?;
            batch.drafts.push(draft);
        }
        tracing::info!(
            assessed = batch.assessed,
            drafted = batch.drafts.len(),
            skipped = batch.skipped.len(),
            min_level = %min_level,
            "Outreach sweep complete"
        );
        Ok(batch)
    }

    async fn draft_for(
        &self,
        athlete: &Athlete,
        risk: &RiskAssessment,
        channels: &[Channel],
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<OutreachDraft, AppError> {
        let highlights: Vec<Highlight> = self
            .db
            .list_highlights(athlete.id, None, None)
            .await?
            .into_iter()
            .filter(|h| h.status != HighlightStatus::Rejected)
            .take(self.outreach.max_highlights)
            .collect();
        let recent = self
            .db
            .recent_athlete_messages(athlete.id, OUTREACH_RECENT_MESSAGES)
            .await?;

        let request = prompts::outreach_request(&OutreachInput {
            athlete,
            risk,
            highlights: &highlights,
            recent: &recent,
            excerpt_chars: self.outreach.excerpt_chars,
            channels,
            language: &self.outreach.language,
            coach_name: self.outreach.coach_name.as_deref(),
        });
        let drafted = self
            .timed(self.complete_outreach(request, channels))
            .await;

        let (text, fallback): (OutreachText, bool) = match drafted {
            Ok(text) => (text, false),
            Err(AppError::Collaborator(e)) => {
                tracing::warn!(athlete_id = athlete.id, error = %e, "Outreach drafting failed, using stock check-in");
                (prompts::fallback_outreach(channels, &self.outreach.language), true)
            }
            Err(e) => return Err(e),
        };

        let draft = OutreachDraft {
            athlete_id: athlete.id,
            language: text.language.unwrap_or_else(|| self.outreach.language.clone()),
            risk_level: risk.level,
            risk_score: risk.score,
            drafts: text.drafts,
            notes: text.notes,
            fallback,
            created_at: now,
        };
        self.db
            .append_audit(
                AuditRecord::new(actor, "outreach.draft", "athlete", athlete.id).with_detail(json!({
                    "channels": channels,
                    "risk_level": draft.risk_level,
                    "risk_score": draft.risk_score,
                    "fallback": fallback,
                })),
                now,
            )
            .await?;
        tracing::info!(
            athlete_id = athlete.id,
            level = %risk.level,
            channels = draft.drafts.len(),
            fallback,
            "Outreach drafted"
        );
        Ok(draft)
    }

    async fn complete_outreach(
        &self,
        request: CompletionRequest,
        channels: &[Channel],
    ) -> Result<OutreachText, AppError> {
        let raw = self.completion.complete(request).await?;
        let text = prompts::parse_outreach(&raw, channels, self.outreach.calendar_url.as_deref())?;
        Ok(text)
    }
}

/// Requested channels the athlete has a handle for, deduplicated in order.
fn reachable_channels(athlete: &Athlete, channels: &[Channel]) -> Vec<Channel> {
    let mut reachable = Vec::new();
    for &channel in channels {
        if !reachable.contains(&channel) && recipient_for(channel, athlete).is_some() {
            reachable.push(channel);
        }
    }
    reachable
}

fn record_failure(performed: &mut ActionsPerformed, action: &str, message_id: i64, e: &AppError) {
    tracing::warn!(action, message_id, error = %e, "Enrichment action failed");
    performed.errors.insert(action.to_string(), e.to_string());
}
