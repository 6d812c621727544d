//! HTTP API handlers for the chat digest service.
//!
//! This module provides REST API endpoints for:
//! - Message ingest from the chat connector
//! - Filter (allow/deny/keyword) management
//! - Manual run triggers and run history
//! - Service status

pub mod filters;
pub mod messages;
pub mod runs;
pub mod status;

use axum::{Json, Router, http::StatusCode, response::IntoResponse, response::Response};
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Create the main API router with all endpoints mounted.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/messages", messages::router())
        .nest("/filters", filters::router())
        .nest("/runs", runs::router())
        .nest("/status", status::router())
}

/// Error response for API errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("bad_request", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }

    pub fn with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}
