//! Job API: lets the coordinator assign a task over HTTP

use crate::events::{Event, EventTag, SchedulerHandle};
use crate::workflow::{query_active_url, ScrapeTask, AUTH_HEADER};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

/// Shared state for job API handlers
#[derive(Clone)]
pub struct JobApiState {
    auth_key: Arc<str>,
    scheduler: SchedulerHandle,
}

impl JobApiState {
    pub fn new(auth_key: &str, scheduler: SchedulerHandle) -> Self {
        Self {
            auth_key: Arc::from(auth_key),
            scheduler,
        }
    }
}

/// Builds the job API router
///
/// - `POST /job/new_job` - schedule a scrape task unless one is in flight
/// - `GET /health` - liveness probe
pub fn router(state: JobApiState) -> Router {
    Router::new()
        .route("/job/new_job", post(new_job))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn new_job(State(state): State<JobApiState>, headers: HeaderMap, body: Bytes) -> Response {
    // Missing key is 401, wrong key is 403
    match headers.get(AUTH_HEADER) {
        None => {
            return (StatusCode::UNAUTHORIZED, "Invalid authentication key").into_response();
        }
        Some(key) if key.as_bytes() != state.auth_key.as_bytes() => {
            return (StatusCode::FORBIDDEN, "Invalid authentication key").into_response();
        }
        Some(_) => {}
    }

    let task: ScrapeTask = match serde_json::from_slice(&body) {
        Ok(task) => task,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
                .into_response();
        }
    };

    match query_active_url(&state.scheduler) {
        Ok(Some(url)) => {
            tracing::info!("Rejecting task {}: still scraping {}", task.task_id, url);
            return Json(json!({ "status": "busy" })).into_response();
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Active URL query failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let event = match Event::with_payload(EventTag::NewScrapeTask, &task) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!("Failed to build scrape event: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Err(e) = state.scheduler.submit(event) {
        tracing::error!("Failed to schedule task {}: {}", task.task_id, e);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    tracing::info!("Scheduled task {} for {}", task.task_id, task.url);
    Json(json!({ "status": "task scheduled" })).into_response()
}
