// src/api.rs
//! Admin/observability surface. The manual publish path shares the poster's
//! serialized state with the automatic loop and returns explicit negative
//! acknowledgments (409 duplicate, 502 send failure) instead of silently
//! dropping operator requests.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::pipeline::{Poster, PosterStatus, PublishOutcome};

#[derive(Clone)]
pub struct AppState {
    pub poster: Arc<Poster>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/publish", post(publish_manual))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> Json<PosterStatus> {
    Json(state.poster.status().await)
}

#[derive(serde::Deserialize)]
struct PublishReq {
    text: String,
    #[serde(default)]
    image_url: Option<String>,
}

async fn publish_manual(
    State(state): State<AppState>,
    Json(body): Json<PublishReq>,
) -> (StatusCode, Json<PublishOutcome>) {
    if body.text.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(PublishOutcome::GeneratorEmpty));
    }
    let outcome = state
        .poster
        .publish_manual(&body.text, body.image_url.as_deref())
        .await;
    let code = match &outcome {
        PublishOutcome::Published { .. } => StatusCode::OK,
        PublishOutcome::DuplicateContent => StatusCode::CONFLICT,
        PublishOutcome::SendFailed => StatusCode::BAD_GATEWAY,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (code, Json(outcome))
}
