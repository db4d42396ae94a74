use axum::{
    body::Bytes,
    extract::{Json, Path, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;
use uuid::Uuid;

use crate::api::models::{StartRequest, StartResponse};
use crate::error::{ApiError, Result};
use crate::status::status_for;
use crate::AppState;

const MISSING_URL: &str = "Please enter a URL.";
const INVALID_JSON: &str = "Invalid JSON body.";

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/start", post(start_task))
        .route("/api/status/:task_id", get(get_status))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Validates the submitted URL and queues a summarization job for it.
async fn start_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let url = submitted_url(&headers, &body)?;
    let task_id = state.orchestrator.submit(&url).await?;

    Ok((StatusCode::ACCEPTED, Json(StartResponse { task_id })))
}

async fn get_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    let job = Uuid::parse_str(&task_id)
        .ok()
        .and_then(|id| state.orchestrator.store().get(id));
    if job.is_none() {
        debug!(task_id = %task_id, "status requested for unknown task");
    }

    Json(status_for(job.as_ref()))
}

/// Reads `url` from a JSON body or, for any other content type, from a form body.
fn submitted_url(headers: &HeaderMap, body: &[u8]) -> Result<String> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    let url = if is_json {
        let request: StartRequest = serde_json::from_slice(body)
            .map_err(|_| ApiError::BadRequest(INVALID_JSON.to_string()))?;
        request.url
    } else {
        url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "url")
            .map(|(_, value)| value.into_owned())
    };

    // Pasted URLs often carry stray whitespace.
    let url = url.unwrap_or_default().trim().to_string();
    if url.is_empty() {
        return Err(ApiError::BadRequest(MISSING_URL.to_string()));
    }
    Ok(url)
}
