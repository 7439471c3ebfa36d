//! Audio session management
//!
//! This module provides the `AudioSession` state machine that manages:
//! - Acquisition of the microphone and loopback streams
//! - The persistent processing graph (analysers, mixing destination)
//! - The recorder bound to the mixed stream and the produced artifact
//! - The level/elapsed-time loop and the published `RecordingState`

mod config;
#[allow(clippy::module_inception)]
mod session;
mod state;

pub use config::SessionConfig;
pub use session::AudioSession;
pub use state::RecordingState;
