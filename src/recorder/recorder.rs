use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::encoder::ContainerFormat;
use crate::audio::AudioFrame;
use crate::error::RecorderError;

#[derive(Debug, Clone)]
pub struct RecorderOptions {
    pub format: ContainerFormat,
    /// How often buffered audio is handed out as a data chunk
    pub timeslice: Duration,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            format: ContainerFormat::Webm,
            timeslice: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Inactive,
    Recording,
}

/// Records a mixed stream into container chunks.
///
/// Each timeslice the buffered frames are encoded and passed to the data
/// callback. After [`MediaRecorder::stop`] the remaining frames are flushed
/// and the stop callback runs on the recorder task.
pub struct MediaRecorder {
    stream: Option<mpsc::Receiver<AudioFrame>>,
    options: RecorderOptions,
    sample_rate: u32,
    channels: u16,
    state: RecorderState,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MediaRecorder {
    pub fn new(
        stream: mpsc::Receiver<AudioFrame>,
        options: RecorderOptions,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        Self {
            stream: Some(stream),
            options,
            sample_rate,
            channels,
            state: RecorderState::Inactive,
            stop_tx: None,
            task: None,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn mime_type(&self) -> &'static str {
        self.options.format.mime_type()
    }

    pub fn start<D, S>(&mut self, mut on_data: D, on_stop: S) -> Result<(), RecorderError>
    where
        D: FnMut(Vec<u8>) + Send + 'static,
        S: FnOnce(Result<(), RecorderError>) + Send + 'static,
    {
        let mut stream = self.stream.take().ok_or(RecorderError::AlreadyStarted)?;
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let mut encoder = self.options.format.encoder(self.sample_rate, self.channels);
        let timeslice = self.options.timeslice.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + timeslice, timeslice);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut pending: Vec<AudioFrame> = Vec::new();
            let mut chunks = 0usize;

            let outcome = async {
                loop {
                    tokio::select! {
                        biased;
                        _ = &mut stop_rx => break,
                        frame = stream.recv() => match frame {
                            Some(frame) => pending.push(frame),
                            None => {
                                debug!("Recorder input closed");
                                break;
                            }
                        },
                        _ = ticker.tick() => {
                            let chunk = encoder.encode(&pending)?;
                            pending.clear();
                            if !chunk.is_empty() {
                                chunks += 1;
                                on_data(chunk);
                            }
                        }
                    }
                }

                // Frames already delivered still belong to the recording
                while let Ok(frame) = stream.try_recv() {
                    pending.push(frame);
                }

                let mut tail = encoder.encode(&pending)?;
                tail.extend(encoder.finish()?);
                if !tail.is_empty() {
                    chunks += 1;
                    on_data(tail);
                }
                Ok::<(), RecorderError>(())
            }
            .await;

            match &outcome {
                Ok(()) => info!("Recorder stopped after {} chunks", chunks),
                Err(e) => error!("Recorder failed: {}", e),
            }
            on_stop(outcome);
        });

        self.stop_tx = Some(stop_tx);
        self.task = Some(task);
        self.state = RecorderState::Recording;
        info!(
            "Recorder started ({}, {}ms timeslice)",
            self.options.format.mime_type(),
            timeslice.as_millis()
        );
        Ok(())
    }

    /// Request a stop; the stop callback follows asynchronously
    pub fn stop(&mut self) -> Result<(), RecorderError> {
        if self.state != RecorderState::Recording {
            return Err(RecorderError::RecorderUnavailable);
        }
        self.state = RecorderState::Inactive;
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        Ok(())
    }

    /// Abort without flushing; neither callback runs again
    pub fn cancel(&mut self) {
        self.state = RecorderState::Inactive;
        self.stop_tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Recorder cancelled");
        }
    }

    /// Handle of the recorder task, resolving once the stop callback ran
    pub fn take_task(&mut self) -> Option<JoinHandle<()>> {
        self.task.take()
    }
}

impl Drop for MediaRecorder {
    fn drop(&mut self) {
        if self.state == RecorderState::Recording {
            self.cancel();
        }
    }
}
