//! Recording of the mixed stream into a downloadable artifact
//!
//! - `recorder`: timesliced recorder with data and stop callbacks
//! - `encoder`: container formats (WebM with PCM blocks, WAV)
//! - `webm`: the EBML writer behind the WebM format
//! - `artifact`: the produced artifact and its file name

mod artifact;
mod encoder;
#[allow(clippy::module_inception)]
mod recorder;
pub mod webm;

pub use artifact::{artifact_file_name, Artifact, ParticipantsInfo, UNKNOWN_PARTICIPANT};
pub use encoder::{ChunkEncoder, ContainerFormat, PcmEncoder, WebmEncoder};
pub use recorder::{MediaRecorder, RecorderOptions, RecorderState};
