//! Level meter and elapsed-time loop
//!
//! One task per recording samples both analysers every tick and publishes
//! their mean spectrum value together with the elapsed whole seconds.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::audio::AnalyserNode;
use crate::session::RecordingState;

/// Arithmetic mean of a byte spectrum, 0 for an empty one
pub fn mean_level(bytes: &[u8]) -> f32 {
    if bytes.is_empty() {
        return 0.0;
    }
    bytes.iter().map(|&b| b as u32).sum::<u32>() as f32 / bytes.len() as f32
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Levels {
    pub mic: f32,
    pub system: f32,
}

/// Reads the current level of each wired analyser
pub struct LevelSampler {
    mic: Arc<AnalyserNode>,
    loopback: Option<Arc<AnalyserNode>>,
}

impl LevelSampler {
    pub fn new(mic: Arc<AnalyserNode>, loopback: Option<Arc<AnalyserNode>>) -> Self {
        Self { mic, loopback }
    }

    pub fn sample(&self) -> Levels {
        Levels {
            mic: mean_level(&self.mic.byte_frequency_data()),
            system: self
                .loopback
                .as_ref()
                .map_or(0.0, |node| mean_level(&node.byte_frequency_data())),
        }
    }
}

pub struct MeterLoop {
    handle: JoinHandle<()>,
}

impl MeterLoop {
    /// Tick until `is_recording` turns false or the loop is cancelled
    pub fn spawn(
        sampler: LevelSampler,
        started_at: Instant,
        interval: Duration,
        state: Arc<watch::Sender<RecordingState>>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if !state.borrow().is_recording {
                    break;
                }

                let levels = sampler.sample();
                let elapsed = started_at.elapsed().as_secs();

                // Stop may have landed since the check above
                state.send_if_modified(|s| {
                    if !s.is_recording {
                        return false;
                    }
                    let changed = s.mic_level != levels.mic
                        || s.system_level != levels.system
                        || s.recording_time_secs != elapsed;
                    s.mic_level = levels.mic;
                    s.system_level = levels.system;
                    s.recording_time_secs = elapsed;
                    changed
                });
            }

            debug!("Meter loop finished");
        });

        Self { handle }
    }

    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AnalyserConfig, AudioFrame, AudioStreamSource};

    fn analyser(source: AudioStreamSource) -> Arc<AnalyserNode> {
        AnalyserNode::new(source, AnalyserConfig::default()).unwrap()
    }

    fn tone(node: &AnalyserNode) {
        let samples = (0..4096)
            .map(|i| ((i as f32 * 0.2).sin() * 16000.0) as i16)
            .collect();
        node.write(&AudioFrame {
            samples,
            sample_rate: 48000,
            channels: 1,
            timestamp_ms: 0,
            source: node.source(),
        });
    }

    fn recording_state() -> Arc<watch::Sender<RecordingState>> {
        let (tx, _) = watch::channel(RecordingState {
            is_recording: true,
            ..Default::default()
        });
        Arc::new(tx)
    }

    #[test]
    fn test_mean_level() {
        assert_eq!(mean_level(&[]), 0.0);
        assert_eq!(mean_level(&[0, 0]), 0.0);
        assert_eq!(mean_level(&[255, 255, 0, 10]), 130.0);
    }

    #[test]
    fn test_unwired_loopback_reads_zero() {
        let mic = analyser(AudioStreamSource::Microphone);
        tone(&mic);

        let levels = LevelSampler::new(mic, None).sample();
        assert!(levels.mic > 0.0);
        assert_eq!(levels.system, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_publishes_levels_and_time() {
        let mic = analyser(AudioStreamSource::Microphone);
        let loopback = analyser(AudioStreamSource::Loopback);
        tone(&mic);

        let state = recording_state();
        let meter = MeterLoop::spawn(
            LevelSampler::new(mic, Some(loopback)),
            Instant::now(),
            Duration::from_millis(16),
            Arc::clone(&state),
        );

        tokio::time::sleep(Duration::from_millis(2100)).await;

        let snapshot = state.borrow().clone();
        assert_eq!(snapshot.recording_time_secs, 2);
        assert!(snapshot.mic_level > 0.0);
        assert_eq!(snapshot.system_level, 0.0);
        meter.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_readings_do_not_notify() {
        let state = recording_state();
        let mut rx = state.subscribe();
        let meter = MeterLoop::spawn(
            LevelSampler::new(analyser(AudioStreamSource::Microphone), None),
            Instant::now(),
            Duration::from_millis(16),
            Arc::clone(&state),
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!rx.has_changed().unwrap(), "silence within the first second is not news");

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().recording_time_secs, 1);
        meter.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ends_when_recording_stops() {
        let state = recording_state();
        let meter = MeterLoop::spawn(
            LevelSampler::new(analyser(AudioStreamSource::Microphone), None),
            Instant::now(),
            Duration::from_millis(16),
            Arc::clone(&state),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!meter.is_finished());

        state.send_modify(|s| s.is_recording = false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(meter.is_finished());
    }
}
