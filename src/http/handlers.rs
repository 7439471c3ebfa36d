use super::state::AppState;
use crate::error::{OutputError, SessionError};
use crate::recorder::ParticipantsInfo;
use crate::session::RecordingState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SetOutputRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct SetOutputResponse {
    pub switched: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub state: RecordingState,
    /// True once the artifact bytes can be downloaded
    pub artifact_ready: bool,
}

impl From<RecordingState> for StatusResponse {
    fn from(state: RecordingState) -> Self {
        Self {
            artifact_ready: state.artifact.as_ref().is_some_and(|a| a.is_ready()),
            state,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn session_error_response(err: SessionError) -> Response {
    let status = match &err {
        SessionError::AlreadyRecording => StatusCode::CONFLICT,
        SessionError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
        SessionError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        SessionError::Disposed => StatusCode::GONE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err)
}

fn output_error_response(err: OutputError) -> Response {
    error!("Output device request failed: {}", err);
    let status = match &err {
        OutputError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        OutputError::Query(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err)
}

fn no_switcher() -> Response {
    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        "no output switcher available",
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /devices/output
pub async fn list_output_devices(State(state): State<AppState>) -> Response {
    let Some(switcher) = state.switcher else {
        return no_switcher();
    };

    match switcher.list_output_devices().await {
        Ok(devices) => (StatusCode::OK, Json(devices)).into_response(),
        Err(e) => output_error_response(e),
    }
}

/// PUT /devices/output
pub async fn set_output_device(
    State(state): State<AppState>,
    Json(req): Json<SetOutputRequest>,
) -> Response {
    let Some(switcher) = state.switcher else {
        return no_switcher();
    };

    match switcher.set_output_device(&req.name).await {
        Ok(switched) => {
            if !switched {
                warn!("Unknown output device requested: {}", req.name);
            }
            (StatusCode::OK, Json(SetOutputResponse { switched })).into_response()
        }
        Err(e) => output_error_response(e),
    }
}

/// POST /recording/start
pub async fn start_recording(State(state): State<AppState>) -> Response {
    let mut session = state.session.lock().await;

    match session.start().await {
        Ok(()) => {
            info!("Recording started via control bridge");
            (StatusCode::OK, Json(StatusResponse::from(session.state()))).into_response()
        }
        Err(e) => {
            error!("Failed to start recording: {}", e);
            session_error_response(e)
        }
    }
}

/// POST /recording/stop
pub async fn stop_recording(State(state): State<AppState>) -> Response {
    let mut session = state.session.lock().await;
    session.stop();
    (StatusCode::OK, Json(StatusResponse::from(session.state()))).into_response()
}

/// GET /recording/status
pub async fn recording_status(State(state): State<AppState>) -> Response {
    let snapshot = state.recording.borrow().clone();
    (StatusCode::OK, Json(StatusResponse::from(snapshot))).into_response()
}

/// PUT /recording/participants
pub async fn set_participants(
    State(state): State<AppState>,
    Json(participants): Json<ParticipantsInfo>,
) -> Response {
    let mut session = state.session.lock().await;
    session.set_participants(participants);
    (StatusCode::OK, Json(session.participants().clone())).into_response()
}

/// GET /recording/artifact
pub async fn download_artifact(State(state): State<AppState>) -> Response {
    let artifact = state.recording.borrow().artifact.clone();

    match artifact {
        Some(artifact) => match artifact.data {
            Some(data) => (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, artifact.mime_type.clone()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", artifact.file_name),
                    ),
                ],
                data.as_ref().clone(),
            )
                .into_response(),
            None => error_response(StatusCode::NOT_FOUND, "artifact is still being assembled"),
        },
        None => error_response(StatusCode::NOT_FOUND, "no artifact recorded"),
    }
}
