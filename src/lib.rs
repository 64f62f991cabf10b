// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Coach inbox: athlete-communications ingestion and orchestration.
//!
//! Inbound messages arrive from channel webhooks or manual entry, are
//! normalized and deduplicated into one timeline per athlete, and are
//! enriched (highlights, reply drafts, to-dos) on a best-effort basis.
//! Outbound messages go through a durable outbox; a risk engine scores
//! athletes from the stored history and drives check-in drafts.

pub mod channels;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::Database;
use services::{
    CompletionClient, EnrichmentPolicy, IngestService, Normalizer, Orchestrator, Outbox,
    RiskEngine, Transcriber,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub ingest: IngestService,
    pub orchestrator: Orchestrator,
    pub outbox: Outbox,
    pub risk: RiskEngine,
}

impl AppState {
    /// Wire the services around one database and the two AI collaborators.
    pub fn new(
        config: Config,
        db: Database,
        transcriber: Arc<dyn Transcriber>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        let normalizer = Normalizer::new(db.clone(), transcriber, config.ingest.clone());
        let ingest = IngestService::new(db.clone(), normalizer, config.ingest.clone());
        let risk = RiskEngine::new(db.clone(), config.risk.clone());
        let orchestrator = Orchestrator::new(
            db.clone(),
            completion,
            EnrichmentPolicy::from(&config.enrichment),
            risk.clone(),
            config.outreach.clone(),
        );
        let outbox = Outbox::new(db.clone(), config.ingest.conversation_idle);

        Self {
            config,
            db,
            ingest,
            orchestrator,
            outbox,
            risk,
        }
    }
}
