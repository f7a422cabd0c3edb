//! scbot daemon library: push endpoint router, feed source and outbox publisher.

mod feed;
mod outbox;
mod settings;
mod state;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use scbot_core::{Delivery, DeliveryError, MentionRecord};
use std::sync::atomic::Ordering;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

pub use feed::JsonFeedSource;
pub use outbox::{OutboxPublisher, OutboxReply};
pub use settings::{DaemonConfig, OutboxConfig, ServerConfig, SourceConfig};
pub use state::{AppState, MemoryRules};

/// Build the axum Router with the given state (used by main and tests).
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/mentions", post(push_mention))
        .route("/rules", get(list_rules))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn push_mention(
    State(state): State<AppState>,
    body: Result<Json<MentionRecord>, JsonRejection>,
) -> impl IntoResponse {
    let record = match body {
        Ok(Json(record)) => record,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": e.body_text()})),
            );
        }
    };
    let id = record.id.clone();
    if !state.identity.is_self(&record) && !state.rules.matches(&record.text) {
        debug!(%id, "no stream rule matches");
        return (
            StatusCode::OK,
            Json(serde_json::json!({"id": id, "status": "filtered"})),
        );
    }
    match state.stream.deliver(record) {
        Ok(Delivery::Queued) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"id": id, "status": "queued"})),
        ),
        Ok(Delivery::Ignored) => (
            StatusCode::OK,
            Json(serde_json::json!({"id": id, "status": "ignored"})),
        ),
        Err(e @ (DeliveryError::QueueFull | DeliveryError::Closed)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"id": id, "error": e.to_string()})),
        ),
    }
}

async fn list_rules(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.rules.list())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.stream.stats();
    Json(serde_json::json!({
        "status": "ok",
        "screen_name": state.identity.screen_name,
        "queued": stats.queued.load(Ordering::SeqCst),
        "ignored": stats.ignored.load(Ordering::SeqCst),
        "rejected": stats.rejected.load(Ordering::SeqCst),
        "posted": stats.posted.load(Ordering::SeqCst),
        "skipped": stats.skipped.load(Ordering::SeqCst),
        "failed": stats.failed.load(Ordering::SeqCst),
    }))
}
