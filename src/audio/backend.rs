use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::CaptureError;

/// Audio stream source type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioStreamSource {
    /// Microphone input
    Microphone,
    /// Loopback input carrying system audio (BlackHole)
    Loopback,
    /// Output of a mixing destination
    Mixed,
}

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since the stream was opened
    pub timestamp_ms: u64,
    /// Audio stream source
    pub source: AudioStreamSource,
}

impl AudioFrame {
    /// Duration of the frame in milliseconds
    pub fn duration_ms(&self) -> u64 {
        let per_second = self.sample_rate as u64 * self.channels.max(1) as u64;
        if per_second == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / per_second
    }
}

/// Configuration shared by capture hosts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioBackendConfig {
    /// Which capture host to use
    pub host: HostKind,
    /// Target sample rate (will resample if needed)
    pub sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub channels: u16,
    /// Frame size in milliseconds delivered to the graph
    pub buffer_duration_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            host: HostKind::Cpal,
            sample_rate: 48000,
            channels: 1,
            buffer_duration_ms: 20,
        }
    }
}

impl AudioBackendConfig {
    /// Number of interleaved samples in one delivered frame
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as u64 * self.buffer_duration_ms / 1000) as usize * self.channels as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    /// Real devices through cpal
    Cpal,
    /// Generated tones (demo mode, tests)
    Synthetic,
}

/// An input capture device as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDevice {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// The host's default input
    Default,
    /// A device id from [`CaptureHost::input_devices`]
    Exact(String),
}

/// Parameters for [`CaptureHost::open_stream`]
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub device: DeviceSelector,
    pub source: AudioStreamSource,
    pub echo_cancellation: bool,
}

impl CaptureRequest {
    pub fn microphone(echo_cancellation: bool) -> Self {
        Self {
            device: DeviceSelector::Default,
            source: AudioStreamSource::Microphone,
            echo_cancellation,
        }
    }

    pub fn loopback(device: &InputDevice) -> Self {
        Self {
            device: DeviceSelector::Exact(device.id.clone()),
            source: AudioStreamSource::Loopback,
            echo_cancellation: false,
        }
    }
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// A single live capture track.
///
/// Disabled tracks keep delivering frames, zeroed. Stopped tracks deliver
/// nothing and have released their device.
pub struct MediaTrack {
    id: Uuid,
    label: String,
    source: AudioStreamSource,
    enabled: AtomicBool,
    ended: AtomicBool,
    frames: broadcast::Sender<AudioFrame>,
    release: Mutex<Option<ReleaseFn>>,
}

impl MediaTrack {
    pub fn new(label: impl Into<String>, source: AudioStreamSource) -> Arc<Self> {
        let (frames, _) = broadcast::channel(64);
        Arc::new(Self {
            id: Uuid::new_v4(),
            label: label.into(),
            source,
            enabled: AtomicBool::new(true),
            ended: AtomicBool::new(false),
            frames,
            release: Mutex::new(None),
        })
    }

    /// Register what to run when the track is stopped
    pub fn on_release(&self, release: impl FnOnce() + Send + 'static) {
        if let Ok(mut slot) = self.release.lock() {
            *slot = Some(Box::new(release));
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> AudioStreamSource {
        self.source
    }

    /// Called by capture hosts for every captured frame
    pub fn deliver(&self, mut frame: AudioFrame) {
        if self.ended.load(Ordering::SeqCst) {
            return;
        }
        if !self.enabled.load(Ordering::SeqCst) {
            frame.samples.iter_mut().for_each(|s| *s = 0);
        }
        // No subscribers is fine: nothing is wired yet
        let _ = self.frames.send(frame);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.frames.subscribe()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_live(&self) -> bool {
        !self.ended.load(Ordering::SeqCst)
    }

    /// End the track and release its device. Idempotent.
    pub fn stop(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let release = self.release.lock().ok().and_then(|mut slot| slot.take());
        if let Some(release) = release {
            release();
        }
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("source", &self.source)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

/// A handle on one or more capture tracks opened together
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: Uuid,
    tracks: Vec<Arc<MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    pub fn set_enabled(&self, enabled: bool) {
        for track in &self.tracks {
            track.set_enabled(enabled);
        }
    }

    /// True while every track is still live
    pub fn is_live(&self) -> bool {
        !self.tracks.is_empty() && self.tracks.iter().all(|t| t.is_live())
    }

    /// Stop every track, releasing the underlying devices
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Audio capture host trait
///
/// Implementations:
/// - cpal: real microphone and loopback devices
/// - Synthetic: generated signals (demo mode, tests)
#[async_trait::async_trait]
pub trait CaptureHost: Send + Sync {
    /// Enumerate the available input capture devices
    async fn input_devices(&self) -> Result<Vec<InputDevice>, CaptureError>;

    /// Open a live capture stream
    async fn open_stream(&self, request: CaptureRequest) -> Result<MediaStream, CaptureError>;

    /// Notifications fired when the set of devices changes, if the host has them
    fn device_changes(&self) -> Option<broadcast::Receiver<()>> {
        None
    }

    /// Get host name for logging
    fn name(&self) -> &str;
}

/// Capture host factory
pub struct CaptureHostFactory;

impl CaptureHostFactory {
    /// Create the capture host named by the configuration
    pub fn create(config: AudioBackendConfig) -> Result<Arc<dyn CaptureHost>> {
        match config.host {
            HostKind::Cpal => Ok(Arc::new(super::cpal_host::CpalHost::new(config))),
            HostKind::Synthetic => Ok(Arc::new(super::synthetic::SyntheticHost::blackhole_rig(
                config,
            ))),
        }
    }
}
