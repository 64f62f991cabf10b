// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Coach inbox API server and outbox dispatcher.

use coach_inbox::{
    channels::{media::MediaResolver, ChannelRegistry},
    config::Config,
    db::Database,
    services::{Dispatcher, OpenAiCompletion, WhisperTranscriber},
    AppState,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting coach inbox");

    let db = Database::open(&config.database_path)
        .await
        .expect("Failed to open database");
    tracing::info!(path = %config.database_path, "Database ready");

    let media = MediaResolver::new(reqwest::Client::new(), &config);
    let transcriber = Arc::new(WhisperTranscriber::new(&config.completion, media));
    let completion = Arc::new(OpenAiCompletion::new(&config.completion));
    if config.completion.api_key.is_none() {
        tracing::warn!("No completion API key; enrichment and transcription will fail per action");
    }
    tracing::info!(
        enrichment_enabled = config.enrichment.enabled,
        model = %config.completion.model,
        "Enrichment configured"
    );

    // Outbox dispatcher runs beside the HTTP server
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = Dispatcher::new(
        db.clone(),
        ChannelRegistry::from_config(&config),
        config.dispatch.clone(),
    );
    let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown_rx));

    let state = Arc::new(AppState::new(config.clone(), db, transcriber, completion));
    let app = coach_inbox::routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = dispatcher_handle.await;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("coach_inbox=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
