//! Message ingest endpoint.
//!
//! Provides:
//! - POST /api/messages - Store one inbound chat message

use axum::{
    Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post,
};

use chatdigest_core::{IngestError, MessageRepository, NewMessage, ingest_message};

use super::ApiError;
use crate::AppState;

/// Create the messages API router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(create_message))
}

/// POST /api/messages
///
/// Returns 201 for a new message and 200 when the same message was delivered before.
async fn create_message(
    State(state): State<AppState>,
    Json(message): Json<NewMessage>,
) -> impl IntoResponse {
    let repo = MessageRepository::new(state.db.clone());
    match ingest_message(&repo, &state.classifier, &message).await {
        Ok(outcome) if outcome.message_id.is_some() => {
            (StatusCode::CREATED, Json(outcome)).into_response()
        }
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(IngestError::Invalid(err)) => {
            ApiError::bad_request(err.to_string()).with_status(StatusCode::BAD_REQUEST)
        }
        Err(IngestError::Store(err)) => {
            tracing::error!(error = %err, chat_id = %message.chat_id, "failed to ingest message");
            ApiError::internal("Failed to store message")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
