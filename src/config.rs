use anyhow::{Context, Result};
use serde::Deserialize;

use crate::audio::AudioBackendConfig;
use crate::output::OutputConfig;
use crate::session::SessionConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub capture: AudioBackendConfig,
    pub session: SessionConfig,
    pub output: OutputConfig,
    /// Where the CLI writes finished recordings
    pub recordings_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

impl Config {
    /// Load `path` (any format the config crate knows, optional) and `REX__*` env overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("REX")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        let mut cfg: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        if cfg.recordings_path.is_empty() {
            cfg.recordings_path = ".".to_string();
        }
        Ok(cfg)
    }

    /// Session settings with the graph format taken from the capture settings
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            sample_rate: self.capture.sample_rate,
            channels: self.capture.channels,
            ..self.session.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::HostKind;
    use crate::output::OutputBackend;
    use crate::recorder::ContainerFormat;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = Config::load("/nonexistent/rex-recorder").unwrap();

        assert_eq!(cfg.service.http.port, 8765);
        assert_eq!(cfg.capture.host, HostKind::Cpal);
        assert_eq!(cfg.session.loopback_marker, "blackhole");
        assert_eq!(cfg.session.container, ContainerFormat::Webm);
        assert_eq!(cfg.output.backend, OutputBackend::Auto);
        assert_eq!(cfg.recordings_path, ".");
    }

    #[test]
    fn test_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
recordings_path = "/tmp/rex"

[capture]
host = "synthetic"
sample_rate = 16000

[session]
container = "wav"
timeslice_ms = 250

[output]
backend = "shell"
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let cfg = Config::load(&path).unwrap();

        assert_eq!(cfg.capture.host, HostKind::Synthetic);
        assert_eq!(cfg.session.container, ContainerFormat::Wav);
        assert_eq!(cfg.session.timeslice_ms, 250);
        assert_eq!(cfg.output.backend, OutputBackend::Shell);
        assert_eq!(cfg.recordings_path, "/tmp/rex");

        let session = cfg.session_config();
        assert_eq!(session.sample_rate, 16000);
        assert_eq!(session.meter_interval_ms, 16);
    }
}
