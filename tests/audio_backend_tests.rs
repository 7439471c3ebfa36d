// Tests for capture host abstractions
//
// These tests verify the core audio types and the synthetic host that the
// session tests build on.

use rex_recorder::audio::{
    AudioBackendConfig, AudioFrame, AudioStreamSource, CaptureHost, CaptureHostFactory,
    CaptureRequest, DeviceSelector, HostKind, MediaTrack, Signal, SyntheticDevice, SyntheticHost,
};
use rex_recorder::CaptureError;
use std::time::Duration;

fn frame(samples: Vec<i16>) -> AudioFrame {
    AudioFrame {
        samples,
        sample_rate: 48000,
        channels: 1,
        timestamp_ms: 0,
        source: AudioStreamSource::Microphone,
    }
}

#[test]
fn test_audio_frame_duration() {
    let mono = frame(vec![0; 960]);
    assert_eq!(mono.duration_ms(), 20);

    let stereo = AudioFrame {
        channels: 2,
        ..frame(vec![0; 960])
    };
    assert_eq!(stereo.duration_ms(), 10);
}

#[test]
fn test_audio_backend_config_default() {
    let config = AudioBackendConfig::default();

    assert_eq!(config.host, HostKind::Cpal);
    assert_eq!(config.sample_rate, 48000);
    assert_eq!(config.channels, 1, "Default should be mono");
    assert_eq!(config.buffer_duration_ms, 20);
    assert_eq!(config.samples_per_frame(), 960);
}

#[test]
fn test_samples_per_frame_counts_channels() {
    let config = AudioBackendConfig {
        sample_rate: 16000,
        channels: 2,
        buffer_duration_ms: 100,
        ..Default::default()
    };

    assert_eq!(config.samples_per_frame(), 3200);
}

#[tokio::test]
async fn test_disabled_track_delivers_silence() {
    let track = MediaTrack::new("mic", AudioStreamSource::Microphone);
    let mut rx = track.subscribe();

    track.set_enabled(false);
    track.deliver(frame(vec![1000; 4]));

    let received = rx.recv().await.unwrap();
    assert_eq!(received.samples, vec![0; 4]);
    assert!(track.is_live());
}

#[tokio::test]
async fn test_stopped_track_runs_release_once() {
    let track = MediaTrack::new("mic", AudioStreamSource::Microphone);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    track.on_release(move || {
        let _ = tx.send(());
    });

    track.stop();
    track.stop();

    assert!(!track.is_live());
    assert!(rx.recv().await.is_some());
    assert!(rx.recv().await.is_none(), "release must run exactly once");
}

#[tokio::test]
async fn test_synthetic_host_delivers_frames() {
    let host = SyntheticHost::blackhole_rig(AudioBackendConfig::default());

    let stream = host
        .open_stream(CaptureRequest::microphone(true))
        .await
        .unwrap();
    let mut rx = stream.tracks()[0].subscribe();

    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(received.samples.len(), 960);
    assert_eq!(received.source, AudioStreamSource::Microphone);
    assert!(received.samples.iter().any(|&s| s != 0), "the rig microphone carries a tone");
    assert_eq!(host.opens(), 1);

    stream.stop();
    assert!(!stream.is_live());
}

#[tokio::test]
async fn test_synthetic_host_errors() {
    let host = SyntheticHost::new(
        AudioBackendConfig::default(),
        vec![SyntheticDevice::new("Mic", Signal::Silence)],
    );

    let missing = host
        .open_stream(CaptureRequest {
            device: DeviceSelector::Exact("blackhole-2ch".to_string()),
            source: AudioStreamSource::Loopback,
            echo_cancellation: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(missing, CaptureError::DeviceNotFound(_)));

    host.deny_permission(true);
    let denied = host
        .open_stream(CaptureRequest::microphone(true))
        .await
        .unwrap_err();
    assert!(matches!(denied, CaptureError::PermissionDenied(_)));
    assert_eq!(host.opens(), 0);
}

#[tokio::test]
async fn test_factory_builds_synthetic_rig() {
    let host = CaptureHostFactory::create(AudioBackendConfig {
        host: HostKind::Synthetic,
        ..Default::default()
    })
    .unwrap();

    assert_eq!(host.name(), "synthetic");
    let labels: Vec<String> = host
        .input_devices()
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.label)
        .collect();
    assert_eq!(labels, vec!["Built-in Microphone", "BlackHole 2ch"]);
}
