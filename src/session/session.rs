use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::SessionConfig;
use super::state::RecordingState;
use crate::audio::{AudioGraph, CaptureHost, GraphConfig, StreamAcquirer};
use crate::error::{RecorderError, SessionError};
use crate::meter::{LevelSampler, MeterLoop};
use crate::recorder::{
    artifact_file_name, Artifact, ContainerFormat, MediaRecorder, ParticipantsInfo, RecorderOptions,
};

type DateSource = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Recording,
    Disposed,
}

/// Records the microphone and the loopback input into one artifact.
///
/// Capture streams, the processing context and the analysers are created on
/// the first start and kept across recordings: stop only pauses them. Only
/// [`AudioSession::dispose`] (or drop) releases the devices.
pub struct AudioSession {
    config: SessionConfig,
    phase: Phase,
    acquirer: StreamAcquirer,
    graph: AudioGraph,
    recorder: Option<MediaRecorder>,
    /// Task of a stopped recorder still assembling its artifact
    finishing: Option<JoinHandle<()>>,
    meter: Option<MeterLoop>,
    participants: ParticipantsInfo,
    state: Arc<watch::Sender<RecordingState>>,
    today: DateSource,
}

impl AudioSession {
    pub fn create(host: Arc<dyn CaptureHost>, config: SessionConfig) -> Self {
        info!(
            "Creating audio session on {} host (loopback marker {:?})",
            host.name(),
            config.loopback_marker
        );

        let acquirer = StreamAcquirer::new(host, &config.loopback_marker, config.echo_cancellation);
        let graph = AudioGraph::new(GraphConfig {
            sample_rate: config.sample_rate,
            channels: config.channels,
            max_buffer_delay_ms: config.max_buffer_delay_ms,
            analyser: config.analyser.clone(),
        });
        let (state, _) = watch::channel(RecordingState::default());

        Self {
            config,
            phase: Phase::Idle,
            acquirer,
            graph,
            recorder: None,
            finishing: None,
            meter: None,
            participants: ParticipantsInfo::default(),
            state: Arc::new(state),
            today: Arc::new(|| chrono::Local::now().date_naive()),
        }
    }

    /// Replace the clock used for artifact dates
    pub fn with_date_source(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Arc::new(today);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> RecordingState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RecordingState> {
        self.state.subscribe()
    }

    pub fn is_recording(&self) -> bool {
        self.phase == Phase::Recording
    }

    pub fn is_disposed(&self) -> bool {
        self.phase == Phase::Disposed
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    pub fn acquirer(&self) -> &StreamAcquirer {
        &self.acquirer
    }

    pub fn participants(&self) -> &ParticipantsInfo {
        &self.participants
    }

    /// Start a new recording
    pub async fn start(&mut self) -> Result<(), SessionError> {
        match self.phase {
            Phase::Recording => return Err(SessionError::AlreadyRecording),
            Phase::Disposed => return Err(SessionError::Disposed),
            Phase::Idle => {}
        }

        // The previous recording's stop callback must land before a new
        // artifact is published
        if let Some(finishing) = self.finishing.take() {
            if let Err(e) = finishing.await {
                warn!("Previous recorder task ended abnormally: {}", e);
            }
        }

        let streams = self.acquirer.acquire().await?;

        let mut wiring = match self
            .graph
            .ensure_graph(&streams.microphone, Some(&streams.loopback))
        {
            Ok(wiring) => wiring,
            Err(e) => {
                self.acquirer.pause();
                return Err(e.into());
            }
        };

        let Some(mixed) = wiring.destination.take_stream() else {
            self.acquirer.pause();
            return Err(RecorderError::RecorderUnavailable.into());
        };

        let format = self.config.container;
        let mut recorder = MediaRecorder::new(
            mixed,
            RecorderOptions {
                format,
                timeslice: self.config.timeslice(),
            },
            self.config.sample_rate,
            self.config.channels,
        );

        let recording_id = Uuid::new_v4();
        let chunks: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));

        let on_data = {
            let chunks = Arc::clone(&chunks);
            move |chunk: Vec<u8>| {
                if let Ok(mut chunks) = chunks.lock() {
                    chunks.push(chunk);
                }
            }
        };

        let on_stop = {
            let state = Arc::clone(&self.state);
            let sample_rate = self.config.sample_rate;
            let channels = self.config.channels;
            move |outcome: Result<(), RecorderError>| {
                let chunks = chunks.lock().map(|mut c| std::mem::take(&mut *c)).unwrap_or_default();
                finish_artifact(&state, recording_id, format, sample_rate, channels, outcome, &chunks);
            }
        };

        if let Err(e) = recorder.start(on_data, on_stop) {
            self.acquirer.pause();
            self.graph.suspend();
            return Err(e.into());
        }

        let started_at = Instant::now();
        let file_name = artifact_file_name(&self.participants, (self.today)(), format.extension());
        info!("Recording {} started: {}", recording_id, file_name);

        self.state.send_modify(|s| {
            s.is_recording = true;
            s.recording_time_secs = 0;
            s.mic_level = 0.0;
            s.system_level = 0.0;
            s.artifact = Some(Artifact::pending(recording_id, file_name, format.mime_type()));
        });

        self.meter = Some(MeterLoop::spawn(
            LevelSampler::new(wiring.mic_analyser, wiring.loopback_analyser),
            started_at,
            self.config.meter_interval(),
            Arc::clone(&self.state),
        ));
        self.recorder = Some(recorder);
        self.phase = Phase::Recording;

        Ok(())
    }

    /// Stop the current recording; does nothing when idle
    pub fn stop(&mut self) {
        if self.phase != Phase::Recording {
            debug!("Stop requested while not recording");
            return;
        }

        if let Some(mut recorder) = self.recorder.take() {
            match recorder.stop() {
                Ok(()) => self.finishing = recorder.take_task(),
                Err(RecorderError::RecorderUnavailable) => debug!("Recorder already inactive"),
                Err(e) => warn!("Failed to stop recorder: {}", e),
            }
        }

        if let Some(meter) = self.meter.take() {
            meter.cancel();
        }

        self.acquirer.pause();
        self.graph.suspend();

        self.state.send_modify(|s| {
            s.is_recording = false;
            s.mic_level = 0.0;
            s.system_level = 0.0;
        });
        self.phase = Phase::Idle;

        info!("Recording stopped");
    }

    /// Release every device and close the graph. Idempotent.
    pub fn dispose(&mut self) {
        if self.phase == Phase::Disposed {
            return;
        }

        if let Some(meter) = self.meter.take() {
            meter.cancel();
        }
        // A running recorder is discarded; a stopped one still delivers its artifact
        let discarded = match self.recorder.take() {
            Some(mut recorder) => {
                recorder.cancel();
                true
            }
            None => false,
        };
        if self.finishing.take().is_some() {
            debug!("Stopped recorder keeps assembling its artifact");
        }

        self.acquirer.release();
        self.graph.close();

        self.state.send_modify(|s| {
            s.is_recording = false;
            s.mic_level = 0.0;
            s.system_level = 0.0;
            if discarded && s.artifact_pending() {
                s.artifact = None;
            }
        });
        self.phase = Phase::Disposed;

        info!("Audio session disposed");
    }

    /// Store participant labels; renames the pending artifact while recording
    pub fn set_participants(&mut self, participants: ParticipantsInfo) {
        self.participants = participants;

        if self.phase != Phase::Recording {
            return;
        }

        let file_name = artifact_file_name(
            &self.participants,
            (self.today)(),
            self.config.container.extension(),
        );
        self.state.send_if_modified(|s| match s.artifact.as_mut() {
            Some(artifact) if !artifact.is_ready() && artifact.file_name != file_name => {
                debug!("Pending artifact renamed to {}", file_name);
                artifact.file_name = file_name;
                true
            }
            _ => false,
        });
    }

    /// Wait until the current artifact has its data; None when there is none
    pub async fn wait_for_artifact(&self) -> Option<Artifact> {
        let mut rx = self.state.subscribe();
        let state = rx.wait_for(|s| !s.artifact_pending()).await.ok()?;
        state.artifact.clone()
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn finish_artifact(
    state: &watch::Sender<RecordingState>,
    recording_id: Uuid,
    format: ContainerFormat,
    sample_rate: u32,
    channels: u16,
    outcome: Result<(), RecorderError>,
    chunks: &[Vec<u8>],
) {
    let assembled = outcome.and_then(|()| format.assemble(sample_rate, channels, chunks));

    state.send_if_modified(|s| {
        let Some(artifact) = s.artifact.as_mut() else {
            return false;
        };
        if artifact.recording_id != recording_id {
            return false;
        }

        match &assembled {
            Ok(bytes) => {
                info!(
                    "Artifact {} ready: {} bytes from {} chunks",
                    artifact.file_name,
                    bytes.len(),
                    chunks.len()
                );
                artifact.data = Some(Arc::new(bytes.clone()));
            }
            Err(e) => {
                error!("Discarding recording {}: {}", recording_id, e);
                s.artifact = None;
            }
        }
        true
    });
}
