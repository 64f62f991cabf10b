// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod athlete;
pub mod audit;
pub mod channel;
pub mod highlight;
pub mod message;
pub mod outbox;
pub mod outreach;
pub mod risk;
pub mod todo;

pub use athlete::{Athlete, NewAthlete};
pub use audit::{AuditEntry, AuditRecord, SYSTEM_ACTOR};
pub use channel::{Channel, Direction, Identity, RawSender};
pub use highlight::{
    Highlight, HighlightCandidate, HighlightCategory, HighlightOrigin, HighlightStatus,
    HighlightUpdate, NewHighlight,
};
pub use message::{Conversation, Message, MessageEvent, RawEvent, ReplyDraft, StoreOutcome};
pub use outbox::{OutboxEntry, OutboxPayload, OutboxStatus};
pub use outreach::{ChannelDraft, OutreachDraft, OutreachNotes};
pub use risk::{RiskAssessment, RiskFactor, RiskLevel};
pub use todo::{NewTodo, Todo, TodoCandidate, TodoCreator, TodoPriority, TodoStatus, TodoUpdate};
