pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod models;
pub mod providers;
pub mod services;
pub mod startup;
pub mod utils;

use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use tower_http::trace::TraceLayer;

use crate::config::LinkConfig;
use crate::services::{CredentialCache, LinkOrchestrator};
use std::sync::Arc;

pub use startup::Application;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<LinkConfig>,
    pub cache: Arc<dyn CredentialCache>,
    pub orchestrator: Arc<LinkOrchestrator>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness))
        .route("/metrics", get(handlers::metrics::metrics))
        // Plaid: token handoff, no consent journey
        .route("/plaid/link", post(handlers::plaid::create_link))
        .route("/plaid/exchange", post(handlers::plaid::exchange_token))
        // GoCardless: agreement, then hosted consent, then exchange
        .route(
            "/gocardless/agreement",
            post(handlers::gocardless::create_agreement),
        )
        .route("/gocardless/link", post(handlers::gocardless::build_link))
        .route(
            "/gocardless/exchange",
            post(handlers::gocardless::exchange_token),
        )
        // Pluggy: widget token, no exchange
        .route("/pluggy/link", post(handlers::pluggy::create_link))
        .with_state(state)
        // Add metrics middleware
        .layer(from_fn(metrics_middleware))
        // Add tracing layer
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
}
