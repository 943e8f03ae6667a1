use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use scene_proto::{Command, Outcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::error::TranslateError;
use crate::metrics;
use crate::state::AppState;
use crate::websocket::websocket_handler;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/api/command", post(execute_command))
        .route("/api/execute", post(execute_command))
        .route("/api/nl", post(execute_natural_language))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    TranslationFailed(String),
    /// The command ran but reported `success: false`.
    CommandFailed(Outcome),
}

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<Outcome>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                Json(ApiErrorBody {
                    error: "bad_request".into(),
                    message: Some(msg),
                    outcome: None,
                }),
            )
                .into_response(),
            ApiError::TranslationFailed(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ApiErrorBody {
                    error: "translation_failed".into(),
                    message: Some(msg),
                    outcome: None,
                }),
            )
                .into_response(),
            ApiError::CommandFailed(outcome) => {
                // `engine_fault` or `strategies_exhausted`, as the engine set it.
                let code = outcome
                    .result
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("engine_fault")
                    .to_string();
                let message = outcome
                    .result
                    .get("message")
                    .or_else(|| outcome.result.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or("command failed")
                    .to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiErrorBody {
                        error: code,
                        message: Some(message),
                        outcome: Some(outcome),
                    }),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
    locks: usize,
    uptime_secs: u64,
    surface: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.sessions.active_count(),
        locks: state.engine.locks().target_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        surface: state.engine.surface_name(),
    })
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

async fn execute_command(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Outcome>, ApiError> {
    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?;
    let command = Command::try_from(value).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    run_one_shot(&state, command).await
}

#[derive(Debug, Deserialize)]
struct NaturalLanguageRequest {
    #[serde(default, alias = "message")]
    text: Option<String>,
}

async fn execute_natural_language(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Outcome>, ApiError> {
    let request: NaturalLanguageRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?;
    let text = request
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing text".into()))?;

    let command = state.translator.translate(&text).await.map_err(|err| match err {
        TranslateError::NoMatch => ApiError::TranslationFailed(format!("could not understand: {text}")),
        other => ApiError::TranslationFailed(other.to_string()),
    })?;
    debug!(action = %command.action, command_id = %command.id, "translated natural language");
    run_one_shot(&state, command).await
}

async fn run_one_shot(state: &AppState, command: Command) -> Result<Json<Outcome>, ApiError> {
    let outcome = state.engine.execute(command).await;
    if outcome.success {
        Ok(Json(outcome))
    } else {
        warn!(command_id = %outcome.command_id, result = %outcome.result, "one-shot command failed");
        Err(ApiError::CommandFailed(outcome))
    }
}
