//! System output device switching
//!
//! Backends:
//! - `coreaudio`: native CoreAudio property calls (macOS only)
//! - `shell`: the `SwitchAudioSource` command-line utility

mod coreaudio;
mod shell;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::OutputError;

pub use coreaudio::CoreAudioSwitcher;
pub use shell::{parse_device_lines, ShellSwitcher, DEFAULT_SWITCH_COMMAND};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDevice {
    pub name: String,
    /// True for the current default output
    pub selected: bool,
}

#[async_trait::async_trait]
pub trait OutputSwitcher: Send + Sync {
    async fn list_output_devices(&self) -> Result<Vec<OutputDevice>, OutputError>;

    /// Make `name` the default output; false when no such output exists
    async fn set_output_device(&self, name: &str) -> Result<bool, OutputError>;

    /// Whether this backend works on the current machine
    async fn probe(&self) -> bool;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputBackend {
    /// Native first, then shell
    #[default]
    Auto,
    Native,
    Shell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub backend: OutputBackend,
    pub switch_command: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            backend: OutputBackend::Auto,
            switch_command: DEFAULT_SWITCH_COMMAND.to_string(),
        }
    }
}

/// Probe the configured backends once and keep the first that works
pub async fn select_switcher(config: &OutputConfig) -> Option<Arc<dyn OutputSwitcher>> {
    let candidates: Vec<Arc<dyn OutputSwitcher>> = match config.backend {
        OutputBackend::Native => vec![Arc::new(CoreAudioSwitcher::new())],
        OutputBackend::Shell => vec![Arc::new(ShellSwitcher::new(&config.switch_command))],
        OutputBackend::Auto => vec![
            Arc::new(CoreAudioSwitcher::new()),
            Arc::new(ShellSwitcher::new(&config.switch_command)),
        ],
    };

    for switcher in candidates {
        if switcher.probe().await {
            info!("Using {} output switcher", switcher.name());
            return Some(switcher);
        }
    }

    warn!("No output switcher available");
    None
}
