//! Chat filter endpoints.
//!
//! Provides:
//! - GET /api/filters - List allow/deny/keyword rules and filter statistics
//! - POST /api/filters - Add an allow, deny or keyword rule
//! - DELETE /api/filters - Remove a rule

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};

use chatdigest_core::RuleKind;
use chatdigest_core::rules::{FilterListing, FilterStats, RuleStoreError};

use super::ApiError;
use crate::AppState;

/// Create the filters API router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_filters).post(add_filter).delete(remove_filter))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FiltersResponse {
    #[serde(flatten)]
    pub listing: FilterListing,
    pub stats: FilterStats,
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub kind: RuleKind,
    pub value: String,
}

/// GET /api/filters
async fn list_filters(State(state): State<AppState>) -> impl IntoResponse {
    match state.classifier.list_filters().await {
        Ok(listing) => (
            StatusCode::OK,
            Json(FiltersResponse {
                listing,
                stats: state.classifier.filter_stats(),
            }),
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to list filters");
            ApiError::internal("Failed to list filters").with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// POST /api/filters
///
/// The classifier picks up the new rule before this returns.
async fn add_filter(
    State(state): State<AppState>,
    Json(request): Json<FilterRequest>,
) -> impl IntoResponse {
    match state.classifier.add_rule(request.kind, &request.value).await {
        Ok(rule) => (StatusCode::CREATED, Json(rule)).into_response(),
        Err(RuleStoreError::EmptyValue) => {
            ApiError::bad_request("value must not be empty").with_status(StatusCode::BAD_REQUEST)
        }
        Err(err) => {
            tracing::error!(error = %err, kind = request.kind.as_str(), "failed to add filter");
            ApiError::internal("Failed to add filter").with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// DELETE /api/filters
async fn remove_filter(
    State(state): State<AppState>,
    Json(request): Json<FilterRequest>,
) -> impl IntoResponse {
    match state
        .classifier
        .remove_rule(request.kind, &request.value)
        .await
    {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => ApiError::not_found(format!(
            "no {} rule for {}",
            request.kind.as_str(),
            request.value
        ))
        .with_status(StatusCode::NOT_FOUND),
        Err(err) => {
            tracing::error!(error = %err, kind = request.kind.as_str(), "failed to remove filter");
            ApiError::internal("Failed to remove filter")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_app;
    use axum::body::to_bytes;

    fn request(kind: RuleKind, value: &str) -> Json<FilterRequest> {
        Json(FilterRequest {
            kind,
            value: value.into(),
        })
    }

    #[tokio::test]
    async fn added_filters_are_listed_with_stats() {
        let app = test_app().await;

        for (kind, value) in [
            (RuleKind::AllowChat, "-100"),
            (RuleKind::DenyChat, "-200"),
            (RuleKind::Keyword, "Тендер"),
        ] {
            let response = add_filter(State(app.state.clone()), request(kind, value))
                .await
                .into_response();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = list_filters(State(app.state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body_bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let body: FiltersResponse = serde_json::from_slice(&body_bytes).expect("json body");
        assert_eq!(body.listing.allow_chats, vec!["-100"]);
        assert_eq!(body.listing.deny_chats, vec!["-200"]);
        assert_eq!(body.listing.keywords, vec!["тендер"]);
        assert_eq!(body.stats.custom_keywords, 1);

        assert!(app.state.classifier.is_work_chat("-100", "семья"));
        assert!(!app.state.classifier.is_work_chat("-200", "проект"));
    }

    #[tokio::test]
    async fn blank_value_is_rejected() {
        let app = test_app().await;

        let response = add_filter(State(app.state), request(RuleKind::Keyword, "  "))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn removing_unknown_filter_is_not_found() {
        let app = test_app().await;

        add_filter(State(app.state.clone()), request(RuleKind::Keyword, "смета"))
            .await
            .into_response();
        let removed = remove_filter(State(app.state.clone()), request(RuleKind::Keyword, "смета"))
            .await
            .into_response();
        assert_eq!(removed.status(), StatusCode::NO_CONTENT);

        let missing = remove_filter(State(app.state), request(RuleKind::Keyword, "смета"))
            .await
            .into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
