pub mod acquire;
pub mod analyser;
pub mod backend;
pub mod convert;
pub mod cpal_host;
pub mod device;
pub mod graph;
pub mod mixer;
pub mod synthetic;

pub use acquire::{AcquiredStreams, StreamAcquirer};
pub use analyser::{AnalyserConfig, AnalyserNode};
pub use backend::{
    AudioBackendConfig, AudioFrame, AudioStreamSource, CaptureHost, CaptureHostFactory,
    CaptureRequest, DeviceSelector, HostKind, InputDevice, MediaStream, MediaTrack,
};
pub use device::{matches_marker, DeviceResolver, DEFAULT_LOOPBACK_MARKER};
pub use graph::{AudioGraph, ContextState, GraphConfig, GraphWiring, MixDestination, ProcessingContext};
pub use mixer::{AudioMixer, MixerConfig};
pub use synthetic::{Signal, SyntheticDevice, SyntheticHost};
