use crate::output::OutputSwitcher;
use crate::session::{AudioSession, RecordingState};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The one audio session; the lock serializes start/stop
    pub session: Arc<Mutex<AudioSession>>,

    /// Output switcher chosen at startup, if any backend works
    pub switcher: Option<Arc<dyn OutputSwitcher>>,

    /// Published session state; read without taking the session lock
    pub recording: watch::Receiver<RecordingState>,
}

impl AppState {
    pub fn new(session: AudioSession, switcher: Option<Arc<dyn OutputSwitcher>>) -> Self {
        let recording = session.subscribe();
        Self {
            session: Arc::new(Mutex::new(session)),
            switcher,
            recording,
        }
    }
}
