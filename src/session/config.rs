use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::{AnalyserConfig, DEFAULT_LOOPBACK_MARKER};
use crate::recorder::ContainerFormat;

/// Configuration for an audio session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Label fragment identifying the loopback input (case-insensitive)
    pub loopback_marker: String,

    /// Ask the microphone capture for echo cancellation
    pub echo_cancellation: bool,

    /// Container of the produced artifact
    pub container: ContainerFormat,

    /// Interval between recorder data chunks
    pub timeslice_ms: u64,

    /// Interval of the level/time loop (default: one 60Hz display frame)
    pub meter_interval_ms: u64,

    /// How long the mixer waits for a lagging source
    pub max_buffer_delay_ms: u64,

    pub analyser: AnalyserConfig,

    /// Graph sample rate; follows the capture settings
    #[serde(skip)]
    pub sample_rate: u32,

    /// Graph channel count; follows the capture settings
    #[serde(skip)]
    pub channels: u16,
}

impl SessionConfig {
    pub fn timeslice(&self) -> Duration {
        Duration::from_millis(self.timeslice_ms)
    }

    pub fn meter_interval(&self) -> Duration {
        Duration::from_millis(self.meter_interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            loopback_marker: DEFAULT_LOOPBACK_MARKER.to_string(),
            echo_cancellation: true,
            container: ContainerFormat::Webm,
            timeslice_ms: 1000,
            meter_interval_ms: 16,
            max_buffer_delay_ms: 200,
            analyser: AnalyserConfig::default(),
            sample_rate: 48000,
            channels: 1,
        }
    }
}
