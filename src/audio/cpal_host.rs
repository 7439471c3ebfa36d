//! cpal-based capture host
//!
//! cpal::Stream is not Send, so every opened stream lives on a dedicated
//! thread that parks until the track is stopped.

use std::sync::Arc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use super::backend::{
    AudioBackendConfig, AudioFrame, CaptureHost, CaptureRequest, DeviceSelector, InputDevice,
    MediaStream, MediaTrack,
};
use super::convert::{f32_to_i16, from_mono, to_mono, u16_to_i16, FrameChunker, LinearResampler};
use crate::error::CaptureError;

/// Capture host backed by the platform's default cpal host
pub struct CpalHost {
    config: AudioBackendConfig,
}

impl CpalHost {
    pub fn new(config: AudioBackendConfig) -> Self {
        info!(
            "cpal capture host initialized ({}Hz, {} channels, {}ms frames)",
            config.sample_rate, config.channels, config.buffer_duration_ms
        );
        Self { config }
    }
}

#[async_trait::async_trait]
impl CaptureHost for CpalHost {
    async fn input_devices(&self) -> Result<Vec<InputDevice>, CaptureError> {
        tokio::task::spawn_blocking(list_input_devices)
            .await
            .map_err(|e| CaptureError::CaptureFailed(format!("device enumeration panicked: {}", e)))?
    }

    async fn open_stream(&self, request: CaptureRequest) -> Result<MediaStream, CaptureError> {
        let selector = request.device.clone();
        let label = tokio::task::spawn_blocking(move || {
            let host = cpal::default_host();
            let device = find_device(&host, &selector)?;
            Ok::<_, CaptureError>(device.name().unwrap_or_else(|_| "unknown".to_string()))
        })
        .await
        .map_err(|e| CaptureError::CaptureFailed(format!("device lookup panicked: {}", e)))??;

        if request.echo_cancellation {
            debug!("Echo cancellation for {} is left to the OS input chain", label);
        }

        let track = MediaTrack::new(label.clone(), request.source);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), CaptureError>>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let thread_track = Arc::clone(&track);
        let selector = request.device.clone();
        let config = self.config.clone();
        thread::Builder::new()
            .name(format!("capture-{}", label))
            .spawn(move || {
                let stream = match build_capture_stream(&selector, &config, thread_track) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CaptureError::CaptureFailed(e.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok(()));
                debug!("Capture thread running");

                // Park until the track is stopped (or the sender is dropped)
                let _ = release_rx.recv();
                drop(stream);

                debug!("Capture thread stopped");
            })
            .map_err(|e| CaptureError::CaptureFailed(format!("failed to spawn capture thread: {}", e)))?;

        ready_rx
            .await
            .map_err(|_| CaptureError::CaptureFailed("capture thread exited".to_string()))??;

        track.on_release(move || {
            let _ = release_tx.send(());
        });

        info!("Opened {:?} capture on {}", request.source, label);

        Ok(MediaStream::new(vec![track]))
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

fn list_input_devices() -> Result<Vec<InputDevice>, CaptureError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;

    Ok(devices
        .filter_map(|d| d.name().ok())
        .map(|name| InputDevice {
            id: name.clone(),
            label: name,
        })
        .collect())
}

fn find_device(host: &cpal::Host, selector: &DeviceSelector) -> Result<cpal::Device, CaptureError> {
    match selector {
        DeviceSelector::Default => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceNotFound("default input".to_string())),
        DeviceSelector::Exact(id) => host
            .input_devices()
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?
            .find(|d| d.name().map(|n| &n == id).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceNotFound(id.clone())),
    }
}

/// Prefer a config running at the target rate; fall back to the device default
fn pick_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig, CaptureError> {
    let usable = |format: SampleFormat| {
        matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
    };

    if let Ok(ranges) = device.supported_input_configs() {
        for range in ranges {
            if usable(range.sample_format())
                && range.min_sample_rate().0 <= target_rate
                && range.max_sample_rate().0 >= target_rate
            {
                return Ok(range.with_sample_rate(cpal::SampleRate(target_rate)));
            }
        }
    }

    device
        .default_input_config()
        .map_err(|e| CaptureError::CaptureFailed(e.to_string()))
}

fn map_build_error(err: cpal::BuildStreamError) -> CaptureError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            CaptureError::DeviceNotFound("device no longer available".to_string())
        }
        other => {
            let message = other.to_string();
            let lower = message.to_lowercase();
            if lower.contains("permission") || lower.contains("not permitted") {
                CaptureError::PermissionDenied(message)
            } else {
                CaptureError::CaptureFailed(message)
            }
        }
    }
}

fn build_capture_stream(
    selector: &DeviceSelector,
    config: &AudioBackendConfig,
    track: Arc<MediaTrack>,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = find_device(&host, selector)?;
    let supported = pick_config(&device, config.sample_rate)?;

    let format = supported.sample_format();
    let device_rate = supported.sample_rate().0;
    let device_channels = supported.channels();
    let stream_config: cpal::StreamConfig = supported.into();

    debug!(
        "Device config: {} Hz, {} channel(s), format: {:?}",
        device_rate, device_channels, format
    );

    let mut pipeline = CapturePipeline::new(track, device_rate, device_channels, config);
    let err_fn = |err| error!("Capture stream error: {}", err);

    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                pipeline.push(data.iter().map(|&s| f32_to_i16(s)))
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| pipeline.push(data.iter().copied()),
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                pipeline.push(data.iter().map(|&s| u16_to_i16(s)))
            },
            err_fn,
            None,
        ),
        other => {
            return Err(CaptureError::CaptureFailed(format!(
                "unsupported sample format: {:?}",
                other
            )))
        }
    };

    stream.map_err(map_build_error)
}

/// Converts device buffers into graph-format frames and delivers them
struct CapturePipeline {
    track: Arc<MediaTrack>,
    device_channels: u16,
    target_rate: u32,
    target_channels: u16,
    resampler: LinearResampler,
    chunker: FrameChunker,
    delivered_samples: u64,
}

impl CapturePipeline {
    fn new(
        track: Arc<MediaTrack>,
        device_rate: u32,
        device_channels: u16,
        config: &AudioBackendConfig,
    ) -> Self {
        Self {
            track,
            device_channels,
            target_rate: config.sample_rate,
            target_channels: config.channels,
            resampler: LinearResampler::new(device_rate, config.sample_rate),
            chunker: FrameChunker::new(config.samples_per_frame() / config.channels.max(1) as usize),
            delivered_samples: 0,
        }
    }

    fn push(&mut self, samples: impl Iterator<Item = i16>) {
        let interleaved: Vec<i16> = samples.collect();
        let mono = to_mono(&interleaved, self.device_channels);
        let resampled = self.resampler.process(&mono);

        for frame in self.chunker.push(&resampled) {
            let timestamp_ms = self.delivered_samples * 1000 / self.target_rate as u64;
            self.delivered_samples += frame.len() as u64;
            self.track.deliver(AudioFrame {
                samples: from_mono(&frame, self.target_channels),
                sample_rate: self.target_rate,
                channels: self.target_channels,
                timestamp_ms,
                source: self.track.source(),
            });
        }
    }
}
