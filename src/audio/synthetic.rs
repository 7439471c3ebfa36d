//! Synthetic capture host
//!
//! Generates tones instead of touching hardware. Used by the `synthetic`
//! host setting (demo mode) and by the test suite, which also uses its
//! failure injection and open counters.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use super::backend::{
    AudioBackendConfig, AudioFrame, CaptureHost, CaptureRequest, DeviceSelector, InputDevice,
    MediaStream, MediaTrack,
};
use crate::error::CaptureError;

/// Signal produced by a synthetic device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    Silence,
    Sine { frequency_hz: f32, amplitude: f32 },
}

#[derive(Debug, Clone)]
pub struct SyntheticDevice {
    pub id: String,
    pub label: String,
    pub signal: Signal,
}

impl SyntheticDevice {
    pub fn new(label: &str, signal: Signal) -> Self {
        Self {
            id: label.to_lowercase().replace(' ', "-"),
            label: label.to_string(),
            signal,
        }
    }
}

pub struct SyntheticHost {
    config: AudioBackendConfig,
    devices: Mutex<Vec<SyntheticDevice>>,
    changes: broadcast::Sender<()>,
    deny_permission: AtomicBool,
    opens: AtomicUsize,
    enumerations: AtomicUsize,
}

impl SyntheticHost {
    /// The first device is the default input
    pub fn new(config: AudioBackendConfig, devices: Vec<SyntheticDevice>) -> Self {
        let (changes, _) = broadcast::channel(8);
        Self {
            config,
            devices: Mutex::new(devices),
            changes,
            deny_permission: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            enumerations: AtomicUsize::new(0),
        }
    }

    /// A built-in microphone plus a BlackHole loopback, both carrying tones
    pub fn blackhole_rig(config: AudioBackendConfig) -> Self {
        Self::new(
            config,
            vec![
                SyntheticDevice::new(
                    "Built-in Microphone",
                    Signal::Sine {
                        frequency_hz: 440.0,
                        amplitude: 0.3,
                    },
                ),
                SyntheticDevice::new(
                    "BlackHole 2ch",
                    Signal::Sine {
                        frequency_hz: 660.0,
                        amplitude: 0.2,
                    },
                ),
            ],
        )
    }

    /// Replace the device list and notify subscribers
    pub fn set_devices(&self, devices: Vec<SyntheticDevice>) {
        if let Ok(mut current) = self.devices.lock() {
            *current = devices;
        }
        let _ = self.changes.send(());
    }

    /// Make subsequent opens fail with `PermissionDenied`
    pub fn deny_permission(&self, deny: bool) {
        self.deny_permission.store(deny, Ordering::SeqCst);
    }

    /// Number of successful stream opens so far
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of device enumerations so far
    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    fn lookup(&self, selector: &DeviceSelector) -> Result<SyntheticDevice, CaptureError> {
        let devices = self
            .devices
            .lock()
            .map_err(|_| CaptureError::CaptureFailed("device list poisoned".to_string()))?;

        match selector {
            DeviceSelector::Default => devices
                .first()
                .cloned()
                .ok_or_else(|| CaptureError::DeviceNotFound("default input".to_string())),
            DeviceSelector::Exact(id) => devices
                .iter()
                .find(|d| &d.id == id)
                .cloned()
                .ok_or_else(|| CaptureError::DeviceNotFound(id.clone())),
        }
    }
}

#[async_trait::async_trait]
impl CaptureHost for SyntheticHost {
    async fn input_devices(&self) -> Result<Vec<InputDevice>, CaptureError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        let devices = self
            .devices
            .lock()
            .map_err(|_| CaptureError::CaptureFailed("device list poisoned".to_string()))?;

        Ok(devices
            .iter()
            .map(|d| InputDevice {
                id: d.id.clone(),
                label: d.label.clone(),
            })
            .collect())
    }

    async fn open_stream(&self, request: CaptureRequest) -> Result<MediaStream, CaptureError> {
        let device = self.lookup(&request.device)?;

        if self.deny_permission.load(Ordering::SeqCst) {
            return Err(CaptureError::PermissionDenied(device.label));
        }

        let track = MediaTrack::new(device.label.clone(), request.source);
        let generator = Arc::clone(&track);
        let config = self.config.clone();
        let signal = device.signal;

        let task = tokio::spawn(async move {
            let frame_ms = config.buffer_duration_ms.max(1);
            let frame_len = config.samples_per_frame() / config.channels.max(1) as usize;
            let mut ticker = tokio::time::interval(Duration::from_millis(frame_ms));
            let mut phase = 0.0f32;
            let mut timestamp_ms = 0u64;

            loop {
                ticker.tick().await;
                let mono = render(signal, config.sample_rate, frame_len, &mut phase);
                generator.deliver(AudioFrame {
                    samples: super::convert::from_mono(&mono, config.channels),
                    sample_rate: config.sample_rate,
                    channels: config.channels,
                    timestamp_ms,
                    source: generator.source(),
                });
                timestamp_ms += frame_ms;
            }
        });

        let abort = task.abort_handle();
        let label = device.label.clone();
        track.on_release(move || {
            abort.abort();
            debug!("Synthetic capture on {} released", label);
        });

        self.opens.fetch_add(1, Ordering::SeqCst);
        info!("Opened synthetic {:?} capture on {}", request.source, device.label);

        Ok(MediaStream::new(vec![track]))
    }

    fn device_changes(&self) -> Option<broadcast::Receiver<()>> {
        Some(self.changes.subscribe())
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

fn render(signal: Signal, sample_rate: u32, len: usize, phase: &mut f32) -> Vec<i16> {
    match signal {
        Signal::Silence => vec![0; len],
        Signal::Sine {
            frequency_hz,
            amplitude,
        } => {
            let step = std::f32::consts::TAU * frequency_hz / sample_rate as f32;
            (0..len)
                .map(|_| {
                    let value = phase.sin() * amplitude;
                    *phase = (*phase + step) % std::f32::consts::TAU;
                    super::convert::f32_to_i16(value)
                })
                .collect()
        }
    }
}
