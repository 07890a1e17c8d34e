//! HTTP trigger
//!
//! `GET /api/emails` runs one invocation and answers with the envelope
//! (200) or an error body (500). The Netlify-style function path is
//! kept as an alias for existing front ends.

use crate::config::ServiceConfig;
use crate::envelope::ErrorBody;
use crate::orchestrator::fetch_latest;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::error;

pub const EMAILS_PATH: &str = "/api/emails";
pub const FUNCTION_PATH: &str = "/.netlify/functions/fetch-emails";

/// Build the trigger routes around a configuration built once at
/// startup.
pub fn router(config: ServiceConfig) -> Router {
    Router::new()
        .route(EMAILS_PATH, get(get_emails))
        .route(FUNCTION_PATH, get(get_emails))
        .with_state(Arc::new(config))
}

async fn get_emails(State(config): State<Arc<ServiceConfig>>) -> Response {
    respond(&config).await
}

/// Run one invocation and turn the outcome into a response.
/// `fetch_latest` enforces the request deadline itself.
pub async fn respond(config: &ServiceConfig) -> Response {
    match fetch_latest(config).await {
        Ok(envelope) => (StatusCode::OK, Json(envelope)).into_response(),
        Err(e) => {
            error!("Invocation failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new(&e, config.expose_errors)),
            )
                .into_response()
        }
    }
}
