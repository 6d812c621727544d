//! Run endpoints.
//!
//! Provides:
//! - POST /api/runs - Run the analysis for the window ending now
//! - GET /api/runs/latest - Most recent run with its chat summaries and LLM usage

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde::Serialize;

use chatdigest_core::llm::{LlmCallRepository, RunLlmUsage};
use chatdigest_core::{ChatSummary, Run, RunError, RunRepository, TriggerKind};

use super::ApiError;
use crate::AppState;

/// Create the runs API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(trigger_run))
        .route("/latest", get(latest_run))
}

#[derive(Debug, Serialize)]
pub struct RunDetails {
    #[serde(flatten)]
    pub run: Run,
    pub summaries: Vec<ChatSummary>,
    pub llm: RunLlmUsage,
}

/// POST /api/runs
///
/// Waits for the run to finish. Returns 409 while another run is in progress.
/// The run keeps going if the client disconnects.
async fn trigger_run(State(state): State<AppState>) -> impl IntoResponse {
    match state
        .runner
        .spawn_trigger(TriggerKind::Manual, Utc::now())
        .await
    {
        Ok(Ok(outcome)) => (StatusCode::OK, Json(outcome)).into_response(),
        Ok(Err(RunError::Overlap)) => ApiError::new("busy", "a run is already in progress")
            .with_status(StatusCode::CONFLICT),
        Ok(Err(err)) => {
            tracing::error!(error = %err, "manual run failed");
            ApiError::new("run_failed", err.to_string())
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(err) => {
            tracing::error!(error = %err, "manual run task aborted");
            ApiError::internal("Run task aborted").with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/runs/latest
async fn latest_run(State(state): State<AppState>) -> impl IntoResponse {
    let repo = RunRepository::new(state.db.clone());
    let run = match repo.latest().await {
        Ok(Some(run)) => run,
        Ok(None) => return ApiError::not_found("no runs yet").with_status(StatusCode::NOT_FOUND),
        Err(err) => {
            tracing::error!(error = %err, "failed to load latest run");
            return ApiError::internal("Failed to load latest run")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let summaries = match repo.list_summaries(&run.id).await {
        Ok(summaries) => summaries,
        Err(err) => {
            tracing::error!(error = %err, run_id = %run.id, "failed to load run summaries");
            return ApiError::internal("Failed to load run summaries")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let llm = match LlmCallRepository::new(state.db.clone())
        .usage_for_run(&run.id)
        .await
    {
        Ok(usage) => usage,
        Err(err) => {
            tracing::error!(error = %err, run_id = %run.id, "failed to load run llm usage");
            return ApiError::internal("Failed to load run llm usage")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    (
        StatusCode::OK,
        Json(RunDetails {
            run,
            summaries,
            llm,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_app;
    use axum::body::to_bytes;
    use chatdigest_core::RunPhase;
    use serde_json::Value;

    async fn body_json(response: axum::response::Response) -> Value {
        let body_bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body_bytes).expect("json body")
    }

    #[tokio::test]
    async fn manual_run_on_empty_window_sends_statistics() {
        let app = test_app().await;

        let response = trigger_run(State(app.state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["report"], "statistics");
        assert_eq!(body["delivered"], true);

        let sent = app.transport.sent.lock().expect("sent lock").clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "owner");
        assert!(sent[0].1.starts_with("📊 Статистика за час:"));
        assert_eq!(app.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn manual_run_is_rejected_while_busy() {
        let app = test_app().await;
        let hold = app.transport.hold.clone().lock_owned().await;

        let mut phase = app.state.runner.subscribe_phase();
        let first_state = app.state.clone();
        let first =
            tokio::spawn(async move { trigger_run(State(first_state)).await.into_response() });
        phase
            .wait_for(|p| *p == RunPhase::Classified)
            .await
            .expect("phase");

        let second = trigger_run(State(app.state.clone())).await.into_response();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(second).await["error"], "busy");

        drop(hold);
        let first = first.await.expect("join");
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(app.transport.sent.lock().expect("sent lock").len(), 1);
    }

    #[tokio::test]
    async fn latest_run_includes_summaries() {
        let app = test_app().await;
        let missing = latest_run(State(app.state.clone())).await.into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        trigger_run(State(app.state.clone())).await.into_response();
        let response = latest_run(State(app.state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["trigger"], "manual");
        assert!(body["summaries"].as_array().expect("summaries").is_empty());
        assert_eq!(body["llm"]["calls"], 0);
    }
}
