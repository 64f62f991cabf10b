// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Prompt construction and output parsing for the enrichment actions.

use crate::error::CollaboratorError;
use crate::models::{
    Athlete, Channel, ChannelDraft, Direction, Highlight, HighlightCandidate, HighlightCategory,
    Message, OutreachNotes, RiskAssessment, TodoCandidate,
};
use crate::services::completion::{CompletionKind, CompletionRequest};
use crate::time_utils::{format_utc_rfc3339, parse_flexible_date};
use serde::Deserialize;
use serde_json::json;

const HIGHLIGHT_SYSTEM: &str = "You analyse conversations between an endurance coach and an \
athlete. Extract short, precise statements (at most 15 words each) that matter for the \
athlete's training: progress, problems or pain, important training decisions, achievements \
and anything that needs the coach's attention. Answer in the language of the conversation.";

const REPLY_SYSTEM: &str = "You are a professional endurance coach replying to one of your \
athletes. Be empathetic, technically precise, motivating but realistic, and brief (at most \
100 words). Answer in the athlete's language. Return only the reply text.";

const TODO_SYSTEM: &str = "You help an endurance coach triage athlete messages. Decide whether \
the latest message contains an actionable request or something the coach must follow up on. \
To-dos are short (at most 20 words), specific and actionable for the coach.";

const OUTREACH_SYSTEM: &str = "You help an endurance coach check in with an athlete who may be \
drifting away. Write brief, empathetic and actionable messages with short sentences and one \
clear call to action. Always write in the target language. Use only the facts you are given. \
Where a booking link fits, write the placeholder {{calendar}}.";

/// Email subjects longer than this are cut
const SUBJECT_MAX_CHARS: usize = 78;
/// Chat drafts are cut well below the channel limit
const CHAT_DRAFT_MAX_CHARS: usize = 900;

/// Render messages as a plain transcript, oldest first.
fn transcript(context: &[Message], latest: &Message) -> String {
    context
        .iter()
        .chain(std::iter::once(latest))
        .map(|m| {
            let who = match m.direction {
                Direction::Inbound => "Athlete",
                Direction::Outbound => "Coach",
            };
            format!("{} ({}): {}", who, format_utc_rfc3339(m.received_at), m.body)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn highlights_request(context: &[Message], latest: &Message, cap: usize) -> CompletionRequest {
    let categories = [
        "training",
        "nutrition",
        "recovery",
        "psychology",
        "injury",
        "performance",
        "planning",
        "schedule",
        "admin",
        "general",
    ]
    .join(", ");
    CompletionRequest {
        kind: CompletionKind::Highlights,
        system: HIGHLIGHT_SYSTEM.to_string(),
        user: format!(
            "Conversation:\n{}\n\nReturn a JSON object {{\"highlights\": [{{\"text\": string, \
             \"category\": one of [{}], \"score\": number between 0 and 1}}]}} with at most {} \
             items, focused on the latest message. Return an empty list if nothing is relevant.",
            transcript(context, latest),
            categories,
            cap
        ),
        max_tokens: 400,
        temperature: 0.3,
        json: true,
    }
}

pub fn reply_request(context: &[Message], latest: &Message, max_chars: usize) -> CompletionRequest {
    CompletionRequest {
        kind: CompletionKind::Reply,
        system: REPLY_SYSTEM.to_string(),
        user: format!(
            "Conversation:\n{}\n\nWrite the coach's reply to the latest athlete message in at \
             most {} characters.",
            transcript(context, latest),
            max_chars
        ),
        max_tokens: 300,
        temperature: 0.7,
        json: false,
    }
}

pub fn todo_request(latest: &Message) -> CompletionRequest {
    CompletionRequest {
        kind: CompletionKind::Todo,
        system: TODO_SYSTEM.to_string(),
        user: format!(
            "Athlete message ({}): {}\n\nReturn a JSON object {{\"has_request\": boolean, \
             \"title\": string, \"details\": string, \"due_at\": ISO-8601 date or null}}.",
            format_utc_rfc3339(latest.received_at),
            latest.body
        ),
        max_tokens: 200,
        temperature: 0.2,
        json: true,
    }
}

/// Everything the outreach prompt is built from.
pub struct OutreachInput<'a> {
    pub athlete: &'a Athlete,
    pub risk: &'a RiskAssessment,
    pub highlights: &'a [Highlight],
    /// Recent messages, oldest first
    pub recent: &'a [Message],
    pub excerpt_chars: usize,
    pub channels: &'a [Channel],
    pub language: &'a str,
    pub coach_name: Option<&'a str>,
}

/// Keep the last `max_chars` characters of `text`.
fn tail_chars(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

pub fn outreach_request(input: &OutreachInput<'_>) -> CompletionRequest {
    let first_name = input
        .athlete
        .name
        .split_whitespace()
        .next()
        .unwrap_or("athlete");
    let excerpt = match input.recent.split_last() {
        Some((latest, context)) => transcript(context, latest),
        None => String::new(),
    };
    let highlights: Vec<_> = input
        .highlights
        .iter()
        .map(|h| json!({ "category": h.category, "text": h.text }))
        .collect();

    let context = json!({
        "athlete": {
            "first_name": first_name,
            "sport": input.athlete.sport,
            "level": input.athlete.level,
        },
        "risk": {
            "level": input.risk.level,
            "score": input.risk.score,
            "evidence": input.risk.evidence,
        },
        "highlights_recent": highlights,
        "conversation_excerpt": tail_chars(&excerpt, input.excerpt_chars),
        "channels": input.channels,
        "coach": { "name": input.coach_name },
        "language": input.language,
    });

    CompletionRequest {
        kind: CompletionKind::Outreach,
        system: OUTREACH_SYSTEM.to_string(),
        user: format!(
            "Context:\n{}\n\nReturn a JSON object {{\"language\": BCP 47 tag, \"email\": \
             {{\"subject\": string of at most {} characters, \"text\": 120 to 180 words}}, \
             \"whatsapp\": 35 to 60 words, \"telegram\": 35 to 60 words, \"notes\": \
             {{\"tone\": string, \"cta\": string, \"reasoning\": [string]}}}}. Only the \
             listed channels are needed.",
            context, SUBJECT_MAX_CHARS
        ),
        max_tokens: 900,
        temperature: 0.6,
        json: true,
    }
}

/// Drafts and notes parsed from the model's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct OutreachText {
    pub language: Option<String>,
    pub drafts: Vec<ChannelDraft>,
    pub notes: OutreachNotes,
}

#[derive(Deserialize)]
struct OutreachOutput {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    email: Option<EmailOutput>,
    #[serde(default)]
    whatsapp: Option<String>,
    #[serde(default)]
    telegram: Option<String>,
    #[serde(default)]
    notes: OutreachNotes,
}

#[derive(Deserialize)]
struct EmailOutput {
    #[serde(default)]
    subject: Option<String>,
    text: String,
}

/// Fill or drop the `{{calendar}}` placeholder and cut to `max_chars`.
fn finish_draft(text: &str, calendar_url: Option<&str>, max_chars: usize) -> String {
    let text = text.replace("{{calendar}}", calendar_url.unwrap_or(""));
    truncate_chars(text.trim(), max_chars)
}

/// Parse outreach output, keeping one draft per requested channel.
///
/// A requested channel without text makes the whole answer malformed.
pub fn parse_outreach(
    raw: &str,
    channels: &[Channel],
    calendar_url: Option<&str>,
) -> Result<OutreachText, CollaboratorError> {
    let output: OutreachOutput = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| CollaboratorError::Malformed(format!("outreach: {}", e)))?;

    let mut drafts = Vec::new();
    for &channel in channels {
        let (subject, text) = match channel {
            Channel::Email => match &output.email {
                Some(email) => (email.subject.as_deref(), Some(email.text.as_str())),
                None => (None, None),
            },
            Channel::Whatsapp => (None, output.whatsapp.as_deref()),
            Channel::Telegram => (None, output.telegram.as_deref()),
            Channel::Manual => continue,
        };
        let limit = match channel {
            Channel::Email => channel.message_limit(),
            _ => CHAT_DRAFT_MAX_CHARS,
        };
        let text = text
            .map(|t| finish_draft(t, calendar_url, limit))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CollaboratorError::Malformed(format!("outreach: no {} draft", channel)))?;
        drafts.push(ChannelDraft {
            channel,
            subject: subject
                .map(|s| truncate_chars(s.trim(), SUBJECT_MAX_CHARS))
                .filter(|s| !s.is_empty()),
            text,
        });
    }

    Ok(OutreachText {
        language: output.language.filter(|l| !l.trim().is_empty()),
        drafts,
        notes: output.notes,
    })
}

/// Stock check-in used when the model cannot produce drafts.
pub fn fallback_outreach(channels: &[Channel], language: &str) -> OutreachText {
    let spanish = language.to_ascii_lowercase().starts_with("es");
    let (subject, short, long, tone, cta) = if spanish {
        (
            "¿Cómo te sientes esta semana?",
            "Hola, ¿cómo va todo con el entrenamiento?",
            "Hola, quería saber cómo va todo con tu entrenamiento. ¿Hay algo en lo que pueda ayudarte?",
            "empático, claro",
            "Responder o agendar 15 minutos",
        )
    } else {
        (
            "How are you feeling this week?",
            "Hi, how is training going?",
            "Hi, I wanted to check how your training is going. Is there anything I can help with?",
            "empathetic, clear",
            "Reply or book 15 minutes",
        )
    };

    let drafts = channels
        .iter()
        .filter_map(|&channel| match channel {
            Channel::Email => Some(ChannelDraft {
                channel,
                subject: Some(subject.to_string()),
                text: long.to_string(),
            }),
            Channel::Whatsapp | Channel::Telegram => Some(ChannelDraft {
                channel,
                subject: None,
                text: short.to_string(),
            }),
            Channel::Manual => None,
        })
        .collect();

    OutreachText {
        language: Some(language.to_string()),
        drafts,
        notes: OutreachNotes {
            tone: tone.to_string(),
            cta: cta.to_string(),
            reasoning: vec!["Follow-up check-in".to_string()],
        },
    }
}

/// Strip a Markdown code fence the model may wrap JSON in.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HighlightsOutput {
    Wrapped { highlights: Vec<RawHighlight> },
    List(Vec<RawHighlight>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawHighlight {
    Full {
        text: String,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        score: Option<f64>,
    },
    Text(String),
}

/// Parse highlight suggestions, keeping at most `cap` non-empty ones.
pub fn parse_highlights(raw: &str, cap: usize) -> Result<Vec<HighlightCandidate>, CollaboratorError> {
    let output: HighlightsOutput = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| CollaboratorError::Malformed(format!("highlights: {}", e)))?;
    let items = match output {
        HighlightsOutput::Wrapped { highlights } => highlights,
        HighlightsOutput::List(list) => list,
    };

    Ok(items
        .into_iter()
        .filter_map(|item| {
            let (text, category, score) = match item {
                RawHighlight::Full {
                    text,
                    category,
                    score,
                } => (text, category, score),
                RawHighlight::Text(text) => (text, None, None),
            };
            let text = text.trim().to_string();
            if text.is_empty() {
                return None;
            }
            Some(HighlightCandidate {
                text,
                category: category
                    .as_deref()
                    .map(HighlightCategory::parse_loose)
                    .unwrap_or(HighlightCategory::General),
                score: score.unwrap_or(0.5).clamp(0.0, 1.0),
            })
        })
        .take(cap)
        .collect())
}

/// Clean a reply draft and cut it to `max_chars` characters.
pub fn parse_reply(raw: &str, max_chars: usize) -> Result<String, CollaboratorError> {
    let text = raw.trim().trim_matches('"').trim();
    if text.is_empty() {
        return Err(CollaboratorError::Malformed("empty reply".to_string()));
    }
    Ok(truncate_chars(text, max_chars))
}

/// Truncate on a character boundary, preferring the last word break.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => cut[..idx].trim_end().to_string(),
        _ => cut,
    }
}

#[derive(Deserialize)]
struct TodoOutput {
    has_request: bool,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    due_at: Option<String>,
}

/// Parse to-do detection output. `Ok(None)` means no actionable request.
pub fn parse_todo(raw: &str) -> Result<Option<TodoCandidate>, CollaboratorError> {
    let output: TodoOutput = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| CollaboratorError::Malformed(format!("todo: {}", e)))?;
    if !output.has_request {
        return Ok(None);
    }
    let title = output.title.unwrap_or_default().trim().to_string();
    if title.is_empty() {
        return Err(CollaboratorError::Malformed("todo without title".to_string()));
    }
    Ok(Some(TodoCandidate {
        title,
        details: output.details.unwrap_or_default().trim().to_string(),
        due_at: output.due_at.as_deref().and_then(parse_flexible_date),
    }))
}
