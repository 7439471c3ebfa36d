// Frequency-domain analysis node
//
// Mirrors the Web Audio analyser: keep the most recent `fft_size` samples,
// apply a Blackman window, take a real FFT, smooth magnitudes over time and
// map the decibel range onto bytes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use realfft::{RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::backend::{AudioFrame, AudioStreamSource};
use crate::error::GraphError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserConfig {
    /// Window length in samples (power of two, 32..=32768)
    pub fft_size: usize,
    /// Weight of the previous spectrum (0.0 = none)
    pub smoothing: f32,
    /// Decibel value mapped to byte 0
    pub min_decibels: f32,
    /// Decibel value mapped to byte 255
    pub max_decibels: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

struct AnalyserState {
    window: VecDeque<f32>,
    smoothed: Vec<f32>,
}

pub struct AnalyserNode {
    id: Uuid,
    source: AudioStreamSource,
    config: AnalyserConfig,
    fft: Arc<dyn RealToComplex<f32>>,
    blackman: Vec<f32>,
    state: Mutex<AnalyserState>,
}

impl AnalyserNode {
    pub fn new(source: AudioStreamSource, config: AnalyserConfig) -> Result<Arc<Self>, GraphError> {
        let n = config.fft_size;
        if !n.is_power_of_two() || !(32..=32768).contains(&n) {
            return Err(GraphError::InvalidFftSize(n));
        }

        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(n);
        let blackman = (0..n)
            .map(|i| {
                let a = 0.16f32;
                let x = i as f32 / n as f32;
                let tau = std::f32::consts::TAU;
                (1.0 - a) / 2.0 - 0.5 * (tau * x).cos() + a / 2.0 * (2.0 * tau * x).cos()
            })
            .collect();

        Ok(Arc::new(Self {
            id: Uuid::new_v4(),
            source,
            fft,
            blackman,
            state: Mutex::new(AnalyserState {
                window: std::iter::repeat(0.0).take(n).collect(),
                smoothed: vec![0.0; n / 2],
            }),
            config,
        }))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source(&self) -> AudioStreamSource {
        self.source
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.config.fft_size / 2
    }

    /// Feed a frame; multi-channel input is folded to mono
    pub fn write(&self, frame: &AudioFrame) {
        let channels = frame.channels.max(1) as usize;
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        for chunk in frame.samples.chunks_exact(channels) {
            let sum: f32 = chunk.iter().map(|&s| s as f32 / 32768.0).sum();
            if state.window.len() == self.config.fft_size {
                state.window.pop_front();
            }
            state.window.push_back(sum / channels as f32);
        }
    }

    /// Current spectrum, one byte per bin.
    ///
    /// Like its Web Audio counterpart, each call advances the temporal
    /// smoothing by one step.
    pub fn byte_frequency_data(&self) -> Vec<u8> {
        let n = self.config.fft_size;
        let bins = self.frequency_bin_count();
        let Ok(mut state) = self.state.lock() else {
            return vec![0; bins];
        };

        let mut input: Vec<f32> = state
            .window
            .iter()
            .zip(&self.blackman)
            .map(|(s, w)| s * w)
            .collect();
        let mut spectrum = self.fft.make_output_vec();
        if let Err(e) = self.fft.process(&mut input, &mut spectrum) {
            warn!("Analyser FFT failed: {}", e);
            return vec![0; bins];
        }

        let tau = self.config.smoothing.clamp(0.0, 1.0);
        let range = self.config.max_decibels - self.config.min_decibels;
        let mut bytes = Vec::with_capacity(bins);

        for (k, value) in spectrum.iter().take(bins).enumerate() {
            let magnitude = value.norm() / n as f32;
            let smoothed = tau * state.smoothed[k] + (1.0 - tau) * magnitude;
            state.smoothed[k] = smoothed;

            let db = 20.0 * smoothed.log10();
            let scaled = 255.0 / range * (db - self.config.min_decibels);
            bytes.push(if scaled.is_finite() {
                scaled.clamp(0.0, 255.0) as u8
            } else {
                0
            });
        }

        bytes
    }
}

impl std::fmt::Debug for AnalyserNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyserNode")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("fft_size", &self.config.fft_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_frame(freq: f32, amplitude: f32, rate: u32, len: usize) -> AudioFrame {
        let samples = (0..len)
            .map(|i| {
                let t = i as f32 / rate as f32;
                ((std::f32::consts::TAU * freq * t).sin() * amplitude * 32767.0) as i16
            })
            .collect();
        AudioFrame {
            samples,
            sample_rate: rate,
            channels: 1,
            timestamp_ms: 0,
            source: AudioStreamSource::Microphone,
        }
    }

    #[test]
    fn test_rejects_invalid_fft_size() {
        let config = AnalyserConfig {
            fft_size: 1000,
            ..Default::default()
        };
        let err = AnalyserNode::new(AudioStreamSource::Microphone, config).unwrap_err();
        assert_eq!(err, GraphError::InvalidFftSize(1000));
    }

    #[test]
    fn test_silence_reads_as_zero() {
        let node = AnalyserNode::new(AudioStreamSource::Microphone, AnalyserConfig::default()).unwrap();
        node.write(&sine_frame(440.0, 0.0, 48000, 4096));

        let bytes = node.byte_frequency_data();
        assert_eq!(bytes.len(), 1024);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_sine_peaks_at_its_bin() {
        let config = AnalyserConfig {
            smoothing: 0.0,
            ..Default::default()
        };
        let node = AnalyserNode::new(AudioStreamSource::Microphone, config).unwrap();
        // 48kHz / 2048 = 23.4375 Hz per bin; 1500 Hz lands on bin 64
        node.write(&sine_frame(1500.0, 0.5, 48000, 4096));

        let bytes = node.byte_frequency_data();
        let (peak, _) = bytes.iter().enumerate().max_by_key(|(_, &b)| b).unwrap();
        assert!((63..=65).contains(&peak), "peak at bin {}", peak);
        assert_eq!(bytes[64], 255);
    }

    #[test]
    fn test_smoothing_decays_after_signal_stops() {
        let node = AnalyserNode::new(AudioStreamSource::Loopback, AnalyserConfig::default()).unwrap();
        node.write(&sine_frame(1500.0, 0.5, 48000, 2048));
        let loud = node.byte_frequency_data()[64];

        node.write(&sine_frame(1500.0, 0.0, 48000, 2048));
        let mut last = loud;
        for _ in 0..5 {
            let current = node.byte_frequency_data()[64];
            assert!(current <= last);
            last = current;
        }
        assert!(last < loud);
    }
}
