// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod completion;
pub mod dispatcher;
pub mod ingest;
pub mod normalizer;
pub mod orchestrator;
pub mod outbox;
pub mod prompts;
pub mod risk;
pub mod transcription;

pub use completion::{CompletionClient, CompletionKind, CompletionRequest, OpenAiCompletion};
pub use dispatcher::{backoff_delay, BackoffPolicy, DispatchReport, Dispatcher};
pub use ingest::{Ingested, IngestService};
pub use normalizer::Normalizer;
pub use orchestrator::{ActionSet, ActionsPerformed, EnrichmentPolicy, Orchestrator, OutreachBatch};
pub use outbox::{Outbox, Queued, SendRequest};
pub use risk::RiskEngine;
pub use transcription::{Transcriber, WhisperTranscriber};
