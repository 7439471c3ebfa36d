use serde::Serialize;

use crate::recorder::Artifact;

/// Snapshot published to observers on every change
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordingState {
    pub is_recording: bool,
    /// Whole seconds since the current recording started
    pub recording_time_secs: u64,
    /// Mean analyser byte value, 0-255
    pub mic_level: f32,
    pub system_level: f32,
    pub artifact: Option<Artifact>,
}

impl RecordingState {
    /// True while the current artifact is still waiting for its data
    pub fn artifact_pending(&self) -> bool {
        self.artifact.as_ref().is_some_and(|a| !a.is_ready())
    }
}
