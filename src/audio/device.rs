use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::backend::{CaptureHost, CaptureRequest, InputDevice, MediaStream};
use crate::error::CaptureError;

/// Label fragment identifying the loopback input
pub const DEFAULT_LOOPBACK_MARKER: &str = "blackhole";

/// Case-insensitive label match against the loopback marker
pub fn matches_marker(label: &str, marker: &str) -> bool {
    label.to_lowercase().contains(&marker.to_lowercase())
}

/// Finds the loopback input by label and opens streams on it.
///
/// The resolved device is cached until the host reports a device change or
/// the cached device fails to open as missing.
pub struct DeviceResolver {
    host: Arc<dyn CaptureHost>,
    marker: String,
    cached: Mutex<Option<InputDevice>>,
    changes: Mutex<Option<broadcast::Receiver<()>>>,
}

impl DeviceResolver {
    pub fn new(host: Arc<dyn CaptureHost>, marker: impl Into<String>) -> Self {
        let changes = host.device_changes();
        Self {
            host,
            marker: marker.into(),
            cached: Mutex::new(None),
            changes: Mutex::new(changes),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Drop the cached device
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            if cached.take().is_some() {
                debug!("Loopback device cache invalidated");
            }
        }
    }

    /// Return the first input whose label contains the marker
    pub async fn find_loopback_input(&self) -> Result<InputDevice, CaptureError> {
        self.drain_device_changes();

        if let Some(device) = self.cached() {
            return Ok(device);
        }

        let devices = self.host.input_devices().await?;
        let device = devices
            .into_iter()
            .find(|d| matches_marker(&d.label, &self.marker))
            .ok_or_else(|| {
                CaptureError::DeviceNotFound(format!("no input label contains {:?}", self.marker))
            })?;

        info!("Found loopback device: {} ({})", device.label, device.id);

        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some(device.clone());
        }

        Ok(device)
    }

    /// Resolve the loopback input and open a capture stream on it
    pub async fn open_loopback(&self) -> Result<MediaStream, CaptureError> {
        let was_cached = self.cached().is_some();
        let device = self.find_loopback_input().await?;

        match self.host.open_stream(CaptureRequest::loopback(&device)).await {
            Err(CaptureError::DeviceNotFound(reason)) if was_cached => {
                warn!("Cached loopback device is gone ({}), resolving again", reason);
                self.invalidate();
                let device = self.find_loopback_input().await?;
                self.host.open_stream(CaptureRequest::loopback(&device)).await
            }
            result => result,
        }
    }

    fn cached(&self) -> Option<InputDevice> {
        self.cached.lock().ok().and_then(|cached| cached.clone())
    }

    fn drain_device_changes(&self) {
        let mut changed = false;
        if let Ok(mut guard) = self.changes.lock() {
            if let Some(rx) = guard.as_mut() {
                loop {
                    match rx.try_recv() {
                        Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_)) => changed = true,
                        Err(_) => break,
                    }
                }
            }
        }
        if changed {
            self.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::AudioBackendConfig;
    use crate::audio::synthetic::{Signal, SyntheticDevice, SyntheticHost};

    fn rig() -> Arc<SyntheticHost> {
        Arc::new(SyntheticHost::blackhole_rig(AudioBackendConfig::default()))
    }

    #[test]
    fn test_marker_match_is_case_insensitive() {
        assert!(matches_marker("BlackHole 2ch", "blackhole"));
        assert!(matches_marker("blackhole 16ch", "BLACKHOLE"));
        assert!(!matches_marker("Built-in Microphone", "blackhole"));
    }

    #[tokio::test]
    async fn test_finds_first_matching_device() {
        let host = Arc::new(SyntheticHost::new(
            AudioBackendConfig::default(),
            vec![
                SyntheticDevice::new("Mic", Signal::Silence),
                SyntheticDevice::new("BlackHole 16ch", Signal::Silence),
                SyntheticDevice::new("BlackHole 2ch", Signal::Silence),
            ],
        ));
        let resolver = DeviceResolver::new(host, DEFAULT_LOOPBACK_MARKER);

        let device = resolver.find_loopback_input().await.unwrap();
        assert_eq!(device.label, "BlackHole 16ch");
    }

    #[tokio::test]
    async fn test_missing_device_is_device_not_found() {
        let host = Arc::new(SyntheticHost::new(
            AudioBackendConfig::default(),
            vec![SyntheticDevice::new("Mic", Signal::Silence)],
        ));
        let resolver = DeviceResolver::new(host, DEFAULT_LOOPBACK_MARKER);

        let err = resolver.find_loopback_input().await.unwrap_err();
        assert!(matches!(err, CaptureError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn test_cache_skips_enumeration_until_device_change() {
        let host = rig();
        let resolver = DeviceResolver::new(host.clone(), DEFAULT_LOOPBACK_MARKER);

        resolver.find_loopback_input().await.unwrap();
        resolver.find_loopback_input().await.unwrap();
        assert_eq!(host.enumerations(), 1);

        host.set_devices(vec![
            SyntheticDevice::new("Mic", Signal::Silence),
            SyntheticDevice::new("BlackHole 64ch", Signal::Silence),
        ]);

        let device = resolver.find_loopback_input().await.unwrap();
        assert_eq!(device.label, "BlackHole 64ch");
        assert_eq!(host.enumerations(), 2);
    }
}
