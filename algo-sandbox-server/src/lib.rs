use algo_sandbox::{
    ExecutionRequest, ExecutionResult, ExecutionService, PollOutcome, SandboxConfig,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

/// Prefix every execution route is mounted under.
pub const API_BASE: &str = "/api/v1/execution";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Execution(#[from] algo_sandbox::Error),
    #[error("Execution not found: {0}")]
    NotFound(String),
    #[error("Server error: {0}")]
    ServerError(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        use algo_sandbox::Error;

        let status = match &self {
            ServerError::Execution(Error::InvalidRequest(_))
            | ServerError::Execution(Error::UnsupportedLanguage(_)) => StatusCode::BAD_REQUEST,
            ServerError::Execution(Error::AlgorithmNotFound(_)) | ServerError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ServerError::Execution(Error::UnsafeCode(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Execution(Error::QueueFull(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("{}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedResponse {
    pub execution_id: String,
}

/// Body of a 202 from the poll route.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResponse {
    pub execution_id: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SecurityCheckRequest {
    pub code: String,
    pub language: String,
}

#[derive(Clone)]
pub struct AppState {
    service: ExecutionService,
}

/// Router over the service described by `config`.
pub fn create_app(config: SandboxConfig) -> Result<Router, ServerError> {
    config.validate()?;
    Ok(router(ExecutionService::from_config(config)))
}

/// Router over an already assembled service.
pub fn router(service: ExecutionService) -> Router {
    let state = AppState { service };

    let api = Router::new()
        .route("/execute", post(execute))
        .route("/execute-async", post(execute_async))
        .route("/async-result/:execution_id", get(async_result))
        .route("/async-cancel/:execution_id", delete(async_cancel))
        .route("/validate-security", post(validate_security))
        .route("/status", get(sandbox_status))
        .route("/health", get(health_check));

    Router::new()
        .nest(API_BASE, api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), ServerError> {
    info!("Starting algorithm sandbox server on {}", addr);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecutionRequest>,
) -> Result<Json<ExecutionResult>, ServerError> {
    let result = state.service.execute(request).await?;
    Ok(Json(result))
}

async fn execute_async(
    State(state): State<AppState>,
    Json(request): Json<ExecutionRequest>,
) -> Result<Json<SubmittedResponse>, ServerError> {
    let execution_id = state.service.execute_async(request).await?;
    Ok(Json(SubmittedResponse { execution_id }))
}

async fn async_result(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Response, ServerError> {
    let pending = |status: &str| {
        (
            StatusCode::ACCEPTED,
            Json(PendingResponse {
                execution_id: execution_id.clone(),
                status: status.to_string(),
            }),
        )
            .into_response()
    };

    match state.service.poll(&execution_id).await {
        PollOutcome::Completed(result) => Ok(Json(result).into_response()),
        PollOutcome::Queued => Ok(pending("QUEUED")),
        PollOutcome::Running => Ok(pending("RUNNING")),
        PollOutcome::Unknown => Err(ServerError::NotFound(execution_id)),
    }
}

async fn async_cancel(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Json<bool> {
    Json(state.service.cancel(&execution_id).await)
}

async fn validate_security(
    State(state): State<AppState>,
    Json(payload): Json<SecurityCheckRequest>,
) -> Json<bool> {
    Json(
        state
            .service
            .validate_security(&payload.code, &payload.language),
    )
}

async fn sandbox_status(State(state): State<AppState>) -> String {
    state.service.sandbox_status().await
}
