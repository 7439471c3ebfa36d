use thiserror::Error;

/// Failures while enumerating or opening capture devices
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture device not found: {0}")]
    DeviceNotFound(String),

    #[error("permission denied for capture device: {0}")]
    PermissionDenied(String),

    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

/// Failures inside the processing graph
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("processing context is closed")]
    ContextClosed,

    #[error("fft size {0} must be a power of two between 32 and 32768")]
    InvalidFftSize(usize),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecorderError {
    /// Stop requested with no active recorder
    #[error("no active recorder")]
    RecorderUnavailable,

    #[error("recorder already started")]
    AlreadyStarted,

    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Errors surfaced by [`crate::session::AudioSession`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("loopback input not found: {0}")]
    DeviceNotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("capture failed: {0}")]
    CaptureFailed(String),

    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("session has been disposed")]
    Disposed,

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::DeviceNotFound(msg) => SessionError::DeviceNotFound(msg),
            CaptureError::PermissionDenied(msg) => SessionError::PermissionDenied(msg),
            CaptureError::CaptureFailed(msg) => SessionError::CaptureFailed(msg),
        }
    }
}

/// Failures while listing or switching system output devices
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OutputError {
    #[error("output backend unavailable: {0}")]
    Unavailable(String),

    #[error("output device query failed: {0}")]
    Query(String),
}
