// Audio mixer for combining microphone and loopback streams
//
// The mixer buffers frames per source and emits one mixed frame once every
// connected source has a frame waiting. A source that falls further behind
// than `max_buffer_delay_ms` no longer holds the others back: whatever is
// buffered is mixed, the missing source counting as silence.

use anyhow::Result;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, AudioStreamSource};

/// Configuration for audio mixer
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Sample rate every input must match
    pub sample_rate: u32,
    /// Channel count every input must match
    pub channels: u16,
    /// Buffered audio (per source) beyond which mixing stops waiting
    pub max_buffer_delay_ms: u64,
    /// Sources to include in the mix
    pub enabled_sources: HashSet<AudioStreamSource>,
}

impl Default for MixerConfig {
    fn default() -> Self {
        let mut enabled_sources = HashSet::new();
        enabled_sources.insert(AudioStreamSource::Microphone);
        enabled_sources.insert(AudioStreamSource::Loopback);

        Self {
            sample_rate: 48000,
            channels: 1,
            max_buffer_delay_ms: 200,
            enabled_sources,
        }
    }
}

/// Audio mixer that combines multiple audio streams
pub struct AudioMixer {
    config: MixerConfig,
    /// Buffers for each audio source type
    buffers: HashMap<AudioStreamSource, VecDeque<AudioFrame>>,
    current_position_ms: u64,
}

impl AudioMixer {
    pub fn new(config: MixerConfig) -> Self {
        info!(
            "Audio mixer initialized: {}Hz, {} channels, {} enabled sources",
            config.sample_rate,
            config.channels,
            config.enabled_sources.len()
        );

        let mut buffers = HashMap::new();
        for source in &config.enabled_sources {
            buffers.insert(*source, VecDeque::new());
        }

        Self {
            config,
            buffers,
            current_position_ms: 0,
        }
    }

    /// Start including a source in the mix
    pub fn enable_source(&mut self, source: AudioStreamSource) {
        if self.config.enabled_sources.insert(source) {
            debug!("Mixer input connected: {:?}", source);
        }
        self.buffers.entry(source).or_default();
    }

    pub fn current_position_ms(&self) -> u64 {
        self.current_position_ms
    }

    /// Buffer a frame based on its source type
    pub fn push(&mut self, frame: AudioFrame) {
        if !self.config.enabled_sources.contains(&frame.source) {
            debug!(
                "Skipping frame from disabled source: {:?} at {}ms",
                frame.source, frame.timestamp_ms
            );
            return;
        }

        if frame.sample_rate != self.config.sample_rate {
            warn!(
                "Frame sample rate mismatch: expected {}, got {}. Dropping frame.",
                self.config.sample_rate, frame.sample_rate
            );
            return;
        }

        if frame.channels != self.config.channels {
            warn!(
                "Frame channel count mismatch: expected {}, got {}. Dropping frame.",
                self.config.channels, frame.channels
            );
            return;
        }

        if let Some(buffer) = self.buffers.get_mut(&frame.source) {
            buffer.push_back(frame);
        }
    }

    /// Emit the next mixed frame if one is ready
    pub fn pop_mixed(&mut self) -> Option<AudioFrame> {
        let all_ready = self.buffers.values().all(|b| !b.is_empty());
        let overdue = self
            .buffers
            .values()
            .any(|b| buffered_ms(b) > self.config.max_buffer_delay_ms);

        if all_ready || overdue {
            if overdue && !all_ready {
                debug!("Mixing without a lagging source at {}ms", self.current_position_ms);
            }
            self.mix_next_chunk()
        } else {
            None
        }
    }

    /// Mix everything still buffered
    pub fn flush(&mut self) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.mix_next_chunk() {
            frames.push(frame);
        }
        frames
    }

    /// Mix one frame from each source buffer that has one
    fn mix_next_chunk(&mut self) -> Option<AudioFrame> {
        let frames_to_mix: Vec<AudioFrame> = self
            .buffers
            .values_mut()
            .filter_map(|buffer| buffer.pop_front())
            .collect();

        if frames_to_mix.is_empty() {
            return None;
        }

        match self.mix_multiple_frames(&frames_to_mix) {
            Ok(mixed) => {
                self.current_position_ms = mixed.timestamp_ms;
                Some(mixed)
            }
            Err(e) => {
                warn!("Mixing failed: {}", e);
                None
            }
        }
    }

    /// Mix multiple audio frames together by adding their samples
    fn mix_multiple_frames(&self, frames: &[AudioFrame]) -> Result<AudioFrame> {
        if frames.is_empty() {
            anyhow::bail!("Cannot mix zero frames");
        }

        // Use the earliest timestamp
        let timestamp_ms = frames.iter().map(|f| f.timestamp_ms).min().unwrap_or(0);

        // Determine output length (use the longest frame)
        let max_len = frames.iter().map(|f| f.samples.len()).max().unwrap_or(0);
        let mut mixed_samples = Vec::with_capacity(max_len);

        for i in 0..max_len {
            let sum: i32 = frames
                .iter()
                .map(|frame| frame.samples.get(i).copied().unwrap_or(0) as i32)
                .sum();

            // Clip to prevent overflow
            mixed_samples.push(sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
        }

        Ok(AudioFrame {
            samples: mixed_samples,
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            timestamp_ms,
            source: AudioStreamSource::Mixed,
        })
    }
}

fn buffered_ms(buffer: &VecDeque<AudioFrame>) -> u64 {
    buffer.iter().map(AudioFrame::duration_ms).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: Vec<i16>, source: AudioStreamSource, timestamp_ms: u64) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate: 48000,
            channels: 1,
            timestamp_ms,
            source,
        }
    }

    fn config_with(sources: &[AudioStreamSource]) -> MixerConfig {
        MixerConfig {
            enabled_sources: sources.iter().copied().collect(),
            ..MixerConfig::default()
        }
    }

    #[test]
    fn test_mixer_creation() {
        let mixer = AudioMixer::new(MixerConfig::default());

        assert_eq!(mixer.buffers.len(), 2);
        assert_eq!(mixer.current_position_ms, 0);
    }

    #[test]
    fn test_enable_source_adds_buffer() {
        let mut mixer = AudioMixer::new(config_with(&[]));
        assert!(mixer.buffers.is_empty());

        mixer.enable_source(AudioStreamSource::Microphone);
        assert_eq!(mixer.buffers.len(), 1);
    }

    #[test]
    fn test_waits_for_every_source() {
        let mut mixer = AudioMixer::new(MixerConfig::default());

        mixer.push(frame(vec![100; 960], AudioStreamSource::Microphone, 0));
        assert!(mixer.pop_mixed().is_none());

        mixer.push(frame(vec![50; 960], AudioStreamSource::Loopback, 0));
        let mixed = mixer.pop_mixed().unwrap();
        assert_eq!(mixed.source, AudioStreamSource::Mixed);
        assert!(mixed.samples.iter().all(|&s| s == 150));
    }

    #[test]
    fn test_lagging_source_stops_blocking() {
        let mut mixer = AudioMixer::new(MixerConfig::default());

        // 20ms frames; 11 of them exceed the 200ms budget
        for i in 0..11 {
            mixer.push(frame(vec![10; 960], AudioStreamSource::Microphone, i * 20));
        }

        let mixed = mixer.pop_mixed().unwrap();
        assert_eq!(mixed.timestamp_ms, 0);
        assert!(mixed.samples.iter().all(|&s| s == 10));
    }

    #[test]
    fn test_disabled_source_is_skipped() {
        let mut mixer = AudioMixer::new(config_with(&[AudioStreamSource::Microphone]));

        mixer.push(frame(vec![1; 4], AudioStreamSource::Loopback, 0));
        assert!(mixer.flush().is_empty());
    }

    #[test]
    fn test_mismatched_format_is_dropped() {
        let mut mixer = AudioMixer::new(config_with(&[AudioStreamSource::Microphone]));

        let mut wrong_rate = frame(vec![1; 4], AudioStreamSource::Microphone, 0);
        wrong_rate.sample_rate = 16000;
        mixer.push(wrong_rate);

        assert!(mixer.flush().is_empty());
    }

    #[test]
    fn test_mix_frames_with_clipping() {
        let mixer = AudioMixer::new(MixerConfig::default());

        let frames = vec![
            frame(vec![i16::MAX - 100], AudioStreamSource::Microphone, 0),
            frame(vec![200], AudioStreamSource::Loopback, 0),
        ];
        let mixed = mixer.mix_multiple_frames(&frames).unwrap();

        assert_eq!(mixed.samples[0], i16::MAX); // Clipped to max
    }

    #[test]
    fn test_mix_frames_different_lengths() {
        let mixer = AudioMixer::new(MixerConfig::default());

        let frames = vec![
            frame(vec![100, 200], AudioStreamSource::Microphone, 40),
            frame(vec![50, 100, 150, 200], AudioStreamSource::Loopback, 20),
        ];
        let mixed = mixer.mix_multiple_frames(&frames).unwrap();

        assert_eq!(mixed.samples, vec![150, 300, 150, 200]);
        assert_eq!(mixed.timestamp_ms, 20); // Earliest timestamp wins
    }

    #[test]
    fn test_flush_drains_everything() {
        let mut mixer = AudioMixer::new(MixerConfig::default());
        mixer.push(frame(vec![1; 4], AudioStreamSource::Microphone, 0));
        mixer.push(frame(vec![1; 4], AudioStreamSource::Microphone, 20));
        mixer.push(frame(vec![1; 4], AudioStreamSource::Loopback, 0));

        let frames = mixer.flush();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples, vec![2; 4]);
        assert_eq!(frames[1].samples, vec![1; 4]);
    }
}
