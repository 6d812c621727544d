//! Service status endpoint.
//!
//! Provides:
//! - GET /api/status - Filter statistics, work chats and scheduler state

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chatdigest_core::rules::FilterStats;
use chatdigest_core::{LibsqlStore, MessageStore, RunPhase};

use super::ApiError;
use crate::AppState;

/// Create the status API router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_status))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub filters: FilterStats,
    pub work_chats: usize,
    pub archive_enabled: bool,
    pub phase: RunPhase,
    pub busy: bool,
    pub next_run: Option<DateTime<Utc>>,
}

/// GET /api/status
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let store = LibsqlStore::new(state.db.clone());
    let work_chats = match store.list_work_chats().await {
        Ok(chats) => chats.len(),
        Err(err) => {
            tracing::error!(error = %err, "failed to list work chats");
            return ApiError::internal("Failed to list work chats")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    (
        StatusCode::OK,
        Json(StatusResponse {
            filters: state.classifier.filter_stats(),
            work_chats,
            archive_enabled: state.runner.archive_enabled(),
            phase: state.runner.phase(),
            busy: state.runner.is_busy(),
            next_run: *state.next_run.borrow(),
        }),
    )
        .into_response()
}
