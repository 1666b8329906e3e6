use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;
use venture_flow::{AnalysisError, AnalysisRunner, AnalysisUpdate, Expert, SupportedModel};

use crate::models::{
    AnalyzeRequest, AnalyzeResponse, ModelInfo, RetryRequest, RetryResponse, StartupAnalysis,
    StartupStatus,
};

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

type ApiResult<T> = Result<Json<T>, ApiError>;
type ApiError = (StatusCode, Json<Value>);

/// HTTP status for a core error. Timeouts win over the wrapped error's own kind.
pub fn status_for(err: &AnalysisError) -> StatusCode {
    if err.is_timeout() {
        return StatusCode::REQUEST_TIMEOUT;
    }
    match err.root_cause() {
        AnalysisError::UnknownModel(_) | AnalysisError::EmptySelection => StatusCode::BAD_REQUEST,
        AnalysisError::UnknownExpert(_)
        | AnalysisError::RunNotFound(_)
        | AnalysisError::ExpertNotInRun { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: &AnalysisError) -> ApiError {
    let status = status_for(err);
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    } else {
        warn!(error = %err, status = status.as_u16(), "Request rejected");
    }
    (
        status,
        Json(json!({
            "error": err.to_string(),
            "kind": format!("{:?}", err.kind()),
        })),
    )
}

fn parse_model(raw: Option<&str>) -> Result<SupportedModel, ApiError> {
    match raw {
        None => Ok(SupportedModel::default()),
        Some(id) => id.parse().map_err(|e: AnalysisError| api_error(&e)),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub runner: AnalysisRunner,
}

pub fn create_app(runner: AnalysisRunner) -> Router {
    build_router(AppState { runner })
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/health/rag", get(rag_health))
        .route("/experts", get(list_experts))
        .route("/models", get(list_models))
        .route("/startups", get(list_startups))
        .route(
            "/startups/{startup_id}/analysis",
            get(get_analysis).delete(delete_analysis),
        )
        .route("/analyze", post(analyze))
        .route(
            "/startups/{startup_id}/experts/{expert_slug}/retry",
            post(retry_expert),
        )
        .layer(middleware::from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Tags each request with a correlation id (reusing the caller's, if sent) and echoes it back.
async fn correlation_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let header = HeaderValue::from_str(&correlation_id).ok();
    if let Some(value) = &header {
        request
            .headers_mut()
            .insert(CORRELATION_ID_HEADER, value.clone());
    }

    let span = info_span!(
        "http_request",
        correlation_id = %correlation_id,
        method = %request.method(),
        uri = %request.uri(),
    );
    let mut response = next.run(request).instrument(span).await;
    if let Some(value) = header {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "AI Venture Agent",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Multi-expert startup investment analysis",
        "endpoints": {
            "GET /experts": "List available investment experts",
            "GET /models": "List selectable models",
            "GET /startups": "List startups from the data source",
            "POST /analyze": "Analyse startups with the selected experts",
            "GET /startups/{startup_id}/analysis": "Latest stored analysis of a startup",
            "DELETE /startups/{startup_id}/analysis": "Forget the stored analysis of a startup",
            "POST /startups/{startup_id}/experts/{expert_slug}/retry": "Re-run one expert",
            "GET /health": "Health check",
            "GET /health/rag": "Vector collection status"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn rag_health(State(state): State<AppState>) -> ApiResult<Value> {
    match state.runner.rag_health().await {
        Ok(Some(health)) => Ok(Json(json!({ "configured": true, "collection": health }))),
        Ok(None) => Ok(Json(json!({ "configured": false }))),
        Err(e) => Err(api_error(&e)),
    }
}

async fn list_experts(State(state): State<AppState>) -> Json<Vec<Expert>> {
    Json(state.runner.list_experts().to_vec())
}

async fn list_models() -> Json<Vec<ModelInfo>> {
    Json(SupportedModel::ALL.into_iter().map(ModelInfo::from).collect())
}

async fn list_startups(State(state): State<AppState>) -> ApiResult<Value> {
    let startups = state.runner.list_startups().await.map_err(|e| api_error(&e))?;
    Ok(Json(json!({ "startups": startups })))
}

async fn get_analysis(
    State(state): State<AppState>,
    Path(startup_id): Path<String>,
) -> ApiResult<Value> {
    match state.runner.run(&startup_id).await {
        Ok(Some(run)) => Ok(Json(json!(run))),
        Ok(None) => Err(api_error(&AnalysisError::RunNotFound(startup_id))),
        Err(e) => Err(api_error(&e)),
    }
}

async fn delete_analysis(
    State(state): State<AppState>,
    Path(startup_id): Path<String>,
) -> ApiResult<Value> {
    match state.runner.delete_run(&startup_id).await {
        Ok(true) => {
            info!(startup_id = %startup_id, "Deleted stored analysis");
            Ok(Json(json!({ "startup_id": startup_id, "deleted": true })))
        }
        Ok(false) => Err(api_error(&AnalysisError::RunNotFound(startup_id))),
        Err(e) => Err(api_error(&e)),
    }
}

async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<AnalyzeResponse> {
    let model = parse_model(request.selected_model.as_deref())?;
    let startup_ids = match request.startup_ids {
        Some(ids) => ids,
        None => state
            .runner
            .list_startups()
            .await
            .map_err(|e| api_error(&e))?
            .into_iter()
            .map(|s| s.id)
            .collect(),
    };
    info!(
        model = %model,
        startups = startup_ids.len(),
        experts = request.selected_experts.len(),
        "Starting analysis"
    );

    let handle = state
        .runner
        .analyze(startup_ids, model, request.selected_experts)
        .await
        .map_err(|e| api_error(&e))?;

    // Startups finish in request order, so terminal updates line up with the ids.
    let results = handle
        .collect()
        .await
        .into_iter()
        .filter_map(|update| match update {
            AnalysisUpdate::RunFinished { startup_id, result } => Some(StartupAnalysis {
                startup_id,
                status: StartupStatus::Completed,
                entries: result.entries().to_vec(),
                error: None,
            }),
            AnalysisUpdate::StartupFailed { startup_id, error } => Some(StartupAnalysis {
                startup_id,
                status: StartupStatus::Failed,
                entries: Vec::new(),
                error: Some(error),
            }),
            AnalysisUpdate::Entry { .. } => None,
        })
        .collect();

    Ok(Json(AnalyzeResponse { model, results }))
}

async fn retry_expert(
    State(state): State<AppState>,
    Path((startup_id, expert_slug)): Path<(String, String)>,
    Json(request): Json<RetryRequest>,
) -> ApiResult<RetryResponse> {
    let model = parse_model(request.selected_model.as_deref())?;
    info!(startup_id = %startup_id, expert = %expert_slug, model = %model, "Retrying expert");

    let entry = state
        .runner
        .retry_expert(&startup_id, &expert_slug, model)
        .await
        .map_err(|e| api_error(&e))?;
    Ok(Json(RetryResponse { startup_id, entry }))
}
