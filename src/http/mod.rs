//! HTTP control bridge for the recording UI
//!
//! This module provides a local REST API over the audio session:
//! - GET/PUT /devices/output - List or switch the system output device
//! - POST /recording/start - Start recording
//! - POST /recording/stop - Stop recording
//! - GET /recording/status - Current recording state
//! - PUT /recording/participants - Set the names used for the artifact
//! - GET /recording/artifact - Download the finished artifact
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
