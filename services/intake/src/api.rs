use crate::config::{ApiConfig, IntakeConfig};
use crate::contributor::IdentityForm;
use crate::session::{IdentityError, Session, SessionRegistry};
use crate::submission::{BatchSizeError, BatchSummary, SubmissionPipeline, SubmitError, UploadItem};
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SubmissionPipeline>,
    pub sessions: Arc<SessionRegistry>,
    pub intake: Arc<IntakeConfig>,
}

/// Parameters the client needs to render the form
#[derive(Debug, Serialize)]
pub struct IntakeFormResponse {
    pub title: String,
    pub intro_text: String,
    pub thank_you_text: String,
    pub max_batch_size: usize,
    pub allowed_extensions: Vec<String>,
    pub require_organisation: bool,
}

/// Result of an accepted batch
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub session: Session,
    pub summary: BatchSummary,
    pub message: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    /// Offending form field, for validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Per-item outcomes when a batch produced nothing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummary>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
            field: None,
            summary: None,
        }),
    )
}

fn session_not_found(id: Uuid) -> ApiError {
    api_error(
        StatusCode::NOT_FOUND,
        format!("Session {id} not found"),
        "SESSION_NOT_FOUND",
    )
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
        if config.cors_origins.is_empty() {
            cors.allow_origin(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            cors.allow_origin(origins)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/intake", get(intake_form))
        .route("/api/v1/sessions", post(create_session))
        .route("/api/v1/sessions/:session_id", get(get_session))
        .route("/api/v1/sessions/:session_id/identity", post(submit_identity))
        .route("/api/v1/sessions/:session_id/photos", post(upload_photos))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "intake-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let records = state.pipeline.records();
    let storage = state.pipeline.blobs().backend();

    match records.check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "metadata": records.backend(),
                "storage": storage
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "metadata": records.backend(),
                "storage": storage,
                "error": e.to_string()
            })),
        ),
    }
}

async fn intake_form(State(state): State<AppState>) -> Json<IntakeFormResponse> {
    let intake = &state.intake;
    Json(IntakeFormResponse {
        title: intake.title.clone(),
        intro_text: intake.render_intro(),
        thank_you_text: intake.thank_you_text.clone(),
        max_batch_size: intake.max_batch_size,
        allowed_extensions: intake.allowed_extensions.clone(),
        require_organisation: intake.require_organisation,
    })
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<Session>) {
    let session = state.sessions.create().await;
    (StatusCode::CREATED, Json(session))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Session>, ApiError> {
    state
        .sessions
        .get(session_id)
        .await
        .map(Json)
        .ok_or_else(|| session_not_found(session_id))
}

/// Validate the identity form; the session advances only on success
#[instrument(skip(state, form))]
async fn submit_identity(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(form): Json<IdentityForm>,
) -> Result<Json<Session>, ApiError> {
    let require_organisation = state.intake.require_organisation;
    let result = state
        .sessions
        .update(session_id, |session| {
            session.submit_identity(&form, require_organisation)?;
            Ok::<_, IdentityError>(session.clone())
        })
        .await
        .ok_or_else(|| session_not_found(session_id))?;

    match result {
        Ok(session) => Ok(Json(session)),
        Err(IdentityError::Invalid(e)) => {
            debug!(field = e.field(), "Identity rejected");
            let (status, Json(mut body)) =
                api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string(), "VALIDATION_ERROR");
            body.field = Some(e.field().to_string());
            Err((status, Json(body)))
        }
        Err(IdentityError::Stage(e)) => Err(api_error(
            StatusCode::CONFLICT,
            e.to_string(),
            "INVALID_STAGE",
        )),
    }
}

/// Accept one batch of photos as multipart parts, one file per part
#[instrument(skip(state, multipart))]
async fn upload_photos(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let items = read_upload_items(multipart).await?;

    info!(items = items.len(), "Batch received");

    // A started batch runs to completion even if the client disconnects
    let summary = state
        .pipeline
        .clone()
        .submit_detached(state.sessions.clone(), session_id, items)
        .await
        .map_err(|e| submit_error_response(session_id, e))?;

    let session = state
        .sessions
        .get(session_id)
        .await
        .ok_or_else(|| session_not_found(session_id))?;

    Ok(Json(UploadResponse {
        session,
        summary,
        message: state.intake.thank_you_text.clone(),
    }))
}

/// Collect every file part. Parts without a filename are form fields and ignored.
async fn read_upload_items(mut multipart: Multipart) -> Result<Vec<UploadItem>, ApiError> {
    let mut items = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        api_error(StatusCode::BAD_REQUEST, e.body_text(), "INVALID_MULTIPART")
    })? {
        let Some(original_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| {
            api_error(StatusCode::BAD_REQUEST, e.body_text(), "INVALID_MULTIPART")
        })?;

        // Browsers send one empty part when no file was picked
        if original_name.is_empty() && bytes.is_empty() {
            continue;
        }

        items.push(UploadItem {
            original_name,
            bytes: bytes.to_vec(),
            content_type,
        });
    }

    Ok(items)
}

fn submit_error_response(session_id: Uuid, err: SubmitError) -> ApiError {
    match err {
        SubmitError::UnknownSession => session_not_found(session_id),
        SubmitError::Stage(e) => api_error(StatusCode::CONFLICT, e.to_string(), "INVALID_STAGE"),
        SubmitError::BatchSize(e @ BatchSizeError::Empty) => {
            api_error(StatusCode::BAD_REQUEST, e.to_string(), "EMPTY_BATCH")
        }
        SubmitError::BatchSize(e @ BatchSizeError::TooMany { .. }) => {
            warn!(error = %e, "Batch rejected");
            api_error(StatusCode::BAD_REQUEST, e.to_string(), "BATCH_TOO_LARGE")
        }
        SubmitError::NothingStored(summary) => {
            let (status, Json(mut body)) = api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "None of the photos could be stored.",
                "NO_PHOTOS_STORED",
            );
            body.summary = Some(summary);
            (status, Json(body))
        }
        e @ (SubmitError::Storage { .. } | SubmitError::Record(_) | SubmitError::Aborted(_)) => {
            error!(error = %e, "Batch upload failed");
            api_error(StatusCode::BAD_GATEWAY, e.to_string(), "UPLOAD_FAILED")
        }
    }
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting intake API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
