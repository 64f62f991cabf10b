// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP route handlers.

pub mod audit;
pub mod highlights;
pub mod ingest;
pub mod messages;
pub mod outreach;
pub mod risk;
pub mod send;
pub mod todos;

use crate::middleware::{auth::require_auth, security::add_security_headers};
use crate::AppState;
use axum::http::{header, request::Parts, HeaderValue, Method};
use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub build_id: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        build_id: option_env!("BUILD_ID").unwrap_or("unknown"),
    })
}

/// The coach UI origin, plus loopback origins for local development.
fn origin_allowed(origin: &str, frontend_url: &str) -> bool {
    origin == frontend_url
        || ["http://localhost", "http://127.0.0.1"]
            .iter()
            .any(|dev| origin.starts_with(dev))
}

fn cors_layer(frontend_url: String) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _: &Parts| {
                origin
                    .to_str()
                    .is_ok_and(|o| origin_allowed(o, &frontend_url))
            },
        ))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
}

/// Build the complete router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    // Webhooks authenticate per channel
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .merge(ingest::routes());

    let coach_routes = Router::new()
        .merge(ingest::protected_routes())
        .merge(messages::routes())
        .merge(highlights::routes())
        .merge(todos::routes())
        .merge(send::routes())
        .merge(risk::routes())
        .merge(outreach::routes())
        .merge(audit::routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let trace = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .merge(public_routes)
        .merge(coach_routes)
        .layer(middleware::from_fn(add_security_headers))
        .layer(cors_layer(state.config.frontend_url.clone()))
        .layer(trace)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::origin_allowed;

    #[test]
    fn test_origin_allowed() {
        let ui = "https://inbox.example.com";
        assert!(origin_allowed(ui, ui));
        assert!(origin_allowed("http://localhost:5173", ui));
        assert!(origin_allowed("http://127.0.0.1:3000", ui));
        assert!(!origin_allowed("https://evil.example.com", ui));
        assert!(!origin_allowed("https://inbox.example.com.evil.net", ui));
    }
}
