pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod meter;
pub mod output;
pub mod recorder;
pub mod session;

pub use audio::{
    AudioBackendConfig, AudioFrame, AudioStreamSource, CaptureHost, CaptureHostFactory, HostKind,
    InputDevice, SyntheticHost,
};
pub use config::Config;
pub use error::{CaptureError, GraphError, OutputError, RecorderError, SessionError};
pub use http::{create_router, AppState};
pub use output::{select_switcher, OutputDevice, OutputSwitcher};
pub use recorder::{Artifact, ContainerFormat, ParticipantsInfo};
pub use session::{AudioSession, RecordingState, SessionConfig};
