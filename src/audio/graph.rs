//! Processing graph: context, source nodes, analysers and mixing destinations
//!
//! Wiring per recording:
//!
//! ```text
//! mic stream      ─► SourceNode ─┬─► mic AnalyserNode       (persistent)
//!                                └─► MixDestination ─► recorder
//! loopback stream ─► SourceNode ─┬─► loopback AnalyserNode  (persistent)
//!                                └─► MixDestination
//! ```

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::analyser::{AnalyserConfig, AnalyserNode};
use super::backend::{AudioFrame, AudioStreamSource, MediaStream};
use super::mixer::{AudioMixer, MixerConfig};
use crate::error::GraphError;

const DESTINATION_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextState {
    Running,
    Suspended,
    Closed,
}

/// The long-lived processing context every node belongs to
pub struct ProcessingContext {
    id: Uuid,
    sample_rate: u32,
    channels: u16,
    state: watch::Sender<ContextState>,
}

impl ProcessingContext {
    pub fn new(sample_rate: u32, channels: u16) -> Arc<Self> {
        let (state, _) = watch::channel(ContextState::Running);
        info!("Created processing context ({}Hz, {} channels)", sample_rate, channels);
        Arc::new(Self {
            id: Uuid::new_v4(),
            sample_rate,
            channels,
            state,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn state(&self) -> ContextState {
        *self.state.borrow()
    }

    pub fn resume(&self) -> Result<(), GraphError> {
        match self.state() {
            ContextState::Closed => Err(GraphError::ContextClosed),
            ContextState::Running => Ok(()),
            ContextState::Suspended => {
                self.state.send_replace(ContextState::Running);
                debug!("Resumed processing context");
                Ok(())
            }
        }
    }

    pub fn suspend(&self) {
        if self.state() == ContextState::Running {
            self.state.send_replace(ContextState::Suspended);
            debug!("Suspended processing context");
        }
    }

    /// Close permanently; later resumes fail
    pub fn close(&self) {
        if self.state.send_replace(ContextState::Closed) != ContextState::Closed {
            info!("Closed processing context");
        }
    }

    fn ensure_open(&self) -> Result<(), GraphError> {
        if self.state() == ContextState::Closed {
            return Err(GraphError::ContextClosed);
        }
        Ok(())
    }

    pub fn create_analyser(
        &self,
        source: AudioStreamSource,
        config: AnalyserConfig,
    ) -> Result<Arc<AnalyserNode>, GraphError> {
        self.ensure_open()?;
        AnalyserNode::new(source, config)
    }

    pub fn create_destination(&self, max_buffer_delay_ms: u64) -> Result<MixDestination, GraphError> {
        self.ensure_open()?;
        Ok(MixDestination::spawn(MixerConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            max_buffer_delay_ms,
            enabled_sources: Default::default(),
        }))
    }

    pub fn create_source(
        &self,
        kind: AudioStreamSource,
        stream: &MediaStream,
    ) -> Result<SourceNode, GraphError> {
        self.ensure_open()?;
        Ok(SourceNode::spawn(kind, stream, self.state.subscribe()))
    }
}

impl std::fmt::Debug for ProcessingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingContext")
            .field("id", &self.id)
            .field("sample_rate", &self.sample_rate)
            .field("state", &self.state())
            .finish()
    }
}

enum DestinationInput {
    Connect(AudioStreamSource),
    Frame(AudioFrame),
}

#[derive(Default)]
struct SourceOutputs {
    analysers: Vec<Arc<AnalyserNode>>,
    destinations: Vec<mpsc::Sender<DestinationInput>>,
}

/// Forwards one stream's frames to its connected nodes
pub struct SourceNode {
    id: Uuid,
    kind: AudioStreamSource,
    outputs: Arc<Mutex<SourceOutputs>>,
    pumps: Vec<JoinHandle<()>>,
}

impl SourceNode {
    fn spawn(
        kind: AudioStreamSource,
        stream: &MediaStream,
        context_state: watch::Receiver<ContextState>,
    ) -> Self {
        let outputs = Arc::new(Mutex::new(SourceOutputs::default()));

        let pumps = stream
            .tracks()
            .iter()
            .map(|track| {
                let mut frames = track.subscribe();
                let outputs = Arc::clone(&outputs);
                let context_state = context_state.clone();

                tokio::spawn(async move {
                    loop {
                        let mut frame = match frames.recv().await {
                            Ok(frame) => frame,
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!("{:?} source lagged, skipped {} frames", kind, skipped);
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        };

                        if *context_state.borrow() != ContextState::Running {
                            continue;
                        }

                        frame.source = kind;
                        let Ok(outputs) = outputs.lock() else {
                            break;
                        };
                        for analyser in &outputs.analysers {
                            analyser.write(&frame);
                        }
                        for destination in &outputs.destinations {
                            if let Err(mpsc::error::TrySendError::Full(_)) =
                                destination.try_send(DestinationInput::Frame(frame.clone()))
                            {
                                warn!("Mixing destination is full, dropping {:?} frame", kind);
                            }
                        }
                    }
                })
            })
            .collect();

        Self {
            id: Uuid::new_v4(),
            kind,
            outputs,
            pumps,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> AudioStreamSource {
        self.kind
    }

    pub fn connect_analyser(&self, analyser: &Arc<AnalyserNode>) {
        if let Ok(mut outputs) = self.outputs.lock() {
            outputs.analysers.push(Arc::clone(analyser));
        }
    }

    pub fn connect_destination(&self, destination: &MixDestination) {
        let input = destination.input.clone();
        if input.try_send(DestinationInput::Connect(self.kind)).is_err() {
            warn!("Mixing destination rejected {:?} connection", self.kind);
            return;
        }
        if let Ok(mut outputs) = self.outputs.lock() {
            outputs.destinations.push(input);
        }
    }

    /// Detach from every node and stop forwarding
    pub fn disconnect(&mut self) {
        if let Ok(mut outputs) = self.outputs.lock() {
            outputs.analysers.clear();
            outputs.destinations.clear();
        }
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }
}

impl Drop for SourceNode {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Mixes connected sources into one stream a recorder can bind to
pub struct MixDestination {
    id: Uuid,
    input: mpsc::Sender<DestinationInput>,
    stream: Option<mpsc::Receiver<AudioFrame>>,
}

impl MixDestination {
    fn spawn(config: MixerConfig) -> Self {
        let (input, mut input_rx) = mpsc::channel::<DestinationInput>(DESTINATION_CAPACITY);
        let (output, stream) = mpsc::channel::<AudioFrame>(DESTINATION_CAPACITY);

        tokio::spawn(async move {
            let mut mixer = AudioMixer::new(config);

            while let Some(message) = input_rx.recv().await {
                match message {
                    DestinationInput::Connect(source) => mixer.enable_source(source),
                    DestinationInput::Frame(frame) => {
                        mixer.push(frame);
                        while let Some(mixed) = mixer.pop_mixed() {
                            if output.send(mixed).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }

            for mixed in mixer.flush() {
                if output.send(mixed).await.is_err() {
                    return;
                }
            }
        });

        Self {
            id: Uuid::new_v4(),
            input,
            stream: Some(stream),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The mixed stream; can be taken once
    pub fn take_stream(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.stream.take()
    }
}

/// What one call to [`AudioGraph::ensure_graph`] wired up
pub struct GraphWiring {
    pub destination: MixDestination,
    pub mic_analyser: Arc<AnalyserNode>,
    /// None when no loopback stream was wired this time
    pub loopback_analyser: Option<Arc<AnalyserNode>>,
}

#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub max_buffer_delay_ms: u64,
    pub analyser: AnalyserConfig,
}

/// Owns the processing context and the persistent analysers
pub struct AudioGraph {
    config: GraphConfig,
    context: Option<Arc<ProcessingContext>>,
    mic_analyser: Option<Arc<AnalyserNode>>,
    loopback_analyser: Option<Arc<AnalyserNode>>,
    sources: Vec<SourceNode>,
}

impl AudioGraph {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            context: None,
            mic_analyser: None,
            loopback_analyser: None,
            sources: Vec::new(),
        }
    }

    pub fn context(&self) -> Option<&Arc<ProcessingContext>> {
        self.context.as_ref()
    }

    pub fn mic_analyser(&self) -> Option<&Arc<AnalyserNode>> {
        self.mic_analyser.as_ref()
    }

    pub fn loopback_analyser(&self) -> Option<&Arc<AnalyserNode>> {
        self.loopback_analyser.as_ref()
    }

    /// Wire the streams into a fresh destination, reusing context and analysers
    pub fn ensure_graph(
        &mut self,
        mic: &MediaStream,
        loopback: Option<&MediaStream>,
    ) -> Result<GraphWiring, GraphError> {
        let context = match &self.context {
            Some(context) => {
                context.resume()?;
                Arc::clone(context)
            }
            None => {
                let context = ProcessingContext::new(self.config.sample_rate, self.config.channels);
                self.context = Some(Arc::clone(&context));
                context
            }
        };

        let destination = context.create_destination(self.config.max_buffer_delay_ms)?;

        // Previous recording's sources must not keep feeding the analysers
        for mut source in self.sources.drain(..) {
            source.disconnect();
        }

        let mic_analyser = match &self.mic_analyser {
            Some(analyser) => Arc::clone(analyser),
            None => {
                let analyser = context
                    .create_analyser(AudioStreamSource::Microphone, self.config.analyser.clone())?;
                self.mic_analyser = Some(Arc::clone(&analyser));
                analyser
            }
        };

        let mic_source = context.create_source(AudioStreamSource::Microphone, mic)?;
        mic_source.connect_analyser(&mic_analyser);
        mic_source.connect_destination(&destination);
        self.sources.push(mic_source);

        let loopback_analyser = match loopback {
            Some(stream) => {
                let analyser = match &self.loopback_analyser {
                    Some(analyser) => Arc::clone(analyser),
                    None => {
                        let analyser = context.create_analyser(
                            AudioStreamSource::Loopback,
                            self.config.analyser.clone(),
                        )?;
                        self.loopback_analyser = Some(Arc::clone(&analyser));
                        analyser
                    }
                };

                let source = context.create_source(AudioStreamSource::Loopback, stream)?;
                source.connect_analyser(&analyser);
                source.connect_destination(&destination);
                self.sources.push(source);
                Some(analyser)
            }
            None => {
                debug!("No loopback stream; system level will read zero");
                None
            }
        };

        debug!("Graph wired into destination {}", destination.id());

        Ok(GraphWiring {
            destination,
            mic_analyser,
            loopback_analyser,
        })
    }

    pub fn suspend(&self) {
        if let Some(context) = &self.context {
            context.suspend();
        }
    }

    /// Disconnect every source and close the context for good
    pub fn close(&mut self) {
        for mut source in self.sources.drain(..) {
            source.disconnect();
        }
        if let Some(context) = &self.context {
            context.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::MediaTrack;
    use std::time::Duration;

    fn graph() -> AudioGraph {
        AudioGraph::new(GraphConfig {
            sample_rate: 48000,
            channels: 1,
            max_buffer_delay_ms: 200,
            analyser: AnalyserConfig::default(),
        })
    }

    fn stream(source: AudioStreamSource) -> (MediaStream, Arc<MediaTrack>) {
        let track = MediaTrack::new("test", source);
        (MediaStream::new(vec![Arc::clone(&track)]), track)
    }

    fn frame(value: i16, source: AudioStreamSource) -> AudioFrame {
        AudioFrame {
            samples: vec![value; 960],
            sample_rate: 48000,
            channels: 1,
            timestamp_ms: 0,
            source,
        }
    }

    #[tokio::test]
    async fn test_analysers_survive_rewiring() {
        let mut graph = graph();
        let (mic, _) = stream(AudioStreamSource::Microphone);
        let (loopback, _) = stream(AudioStreamSource::Loopback);

        let first = graph.ensure_graph(&mic, Some(&loopback)).unwrap();
        let context_id = graph.context().unwrap().id();
        graph.suspend();
        let second = graph.ensure_graph(&mic, Some(&loopback)).unwrap();

        assert_eq!(first.mic_analyser.id(), second.mic_analyser.id());
        assert_eq!(
            first.loopback_analyser.unwrap().id(),
            second.loopback_analyser.unwrap().id()
        );
        assert_ne!(first.destination.id(), second.destination.id());
        assert_eq!(graph.context().unwrap().id(), context_id);
        assert_eq!(graph.context().unwrap().state(), ContextState::Running);
    }

    #[tokio::test]
    async fn test_missing_loopback_leaves_analyser_unset() {
        let mut graph = graph();
        let (mic, _) = stream(AudioStreamSource::Microphone);

        let wiring = graph.ensure_graph(&mic, None).unwrap();
        assert!(wiring.loopback_analyser.is_none());
        assert!(graph.loopback_analyser().is_none());
    }

    #[tokio::test]
    async fn test_destination_mixes_sources() {
        let mut graph = graph();
        let (mic, mic_track) = stream(AudioStreamSource::Microphone);
        let (loopback, loopback_track) = stream(AudioStreamSource::Loopback);

        let mut wiring = graph.ensure_graph(&mic, Some(&loopback)).unwrap();
        let mut mixed = wiring.destination.take_stream().unwrap();
        tokio::task::yield_now().await;

        mic_track.deliver(frame(100, AudioStreamSource::Microphone));
        loopback_track.deliver(frame(20, AudioStreamSource::Loopback));

        let out = tokio::time::timeout(Duration::from_secs(1), mixed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.source, AudioStreamSource::Mixed);
        assert!(out.samples.iter().all(|&s| s == 120));
    }

    #[tokio::test]
    async fn test_closed_context_refuses_rewiring() {
        let mut graph = graph();
        let (mic, _) = stream(AudioStreamSource::Microphone);

        graph.ensure_graph(&mic, None).unwrap();
        graph.close();

        let err = graph.ensure_graph(&mic, None).err().unwrap();
        assert_eq!(err, GraphError::ContextClosed);
    }
}
