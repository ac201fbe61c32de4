use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::db::{Database, Publication};
use crate::error::IngestError;
use crate::scheduler::Scheduler;

pub struct AppState {
    pub db: Arc<Database>,
    pub scheduler: Arc<Scheduler>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/admin/scheduler/status", get(scheduler_status))
        .route("/admin/scheduler/trigger", post(trigger_ingestion))
        .route("/admin/cleanup", post(cleanup))
        .route("/admin/publications", get(publications))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Custom error type
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("{:#}", self.0) })),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

#[derive(Serialize)]
pub struct PublicationStatus {
    #[serde(flatten)]
    pub publication: Publication,
    pub article_count: i64,
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn scheduler_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.status().await)
}

pub async fn trigger_ingestion(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    match state.scheduler.trigger_ingestion_now().await {
        Ok(stats) => Ok(Json(stats).into_response()),
        Err(e @ IngestError::RunInProgress) => Ok((
            StatusCode::CONFLICT,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

pub async fn cleanup(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let stats = state.scheduler.trigger_cleanup_now().await?;
    Ok(Json(stats))
}

pub async fn publications(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let publications = state.db.get_all_publications().await?;

    let mut statuses = Vec::with_capacity(publications.len());
    for publication in publications {
        let article_count = state
            .db
            .get_article_count_for_publication(publication.id)
            .await?;
        statuses.push(PublicationStatus {
            publication,
            article_count,
        });
    }

    Ok(Json(statuses))
}
