use std::sync::Arc;

use tracing::{info, warn};

use super::backend::{CaptureHost, CaptureRequest, MediaStream};
use super::device::DeviceResolver;
use crate::error::CaptureError;

/// The microphone and loopback streams of one session
#[derive(Debug, Clone)]
pub struct AcquiredStreams {
    pub microphone: MediaStream,
    pub loopback: MediaStream,
}

impl AcquiredStreams {
    fn is_live(&self) -> bool {
        self.microphone.is_live() && self.loopback.is_live()
    }

    fn set_enabled(&self, enabled: bool) {
        self.microphone.set_enabled(enabled);
        self.loopback.set_enabled(enabled);
    }

    fn stop(&self) {
        self.microphone.stop();
        self.loopback.stop();
    }
}

/// Obtains the two capture streams once and re-enables them on later starts
pub struct StreamAcquirer {
    host: Arc<dyn CaptureHost>,
    resolver: DeviceResolver,
    echo_cancellation: bool,
    streams: Option<AcquiredStreams>,
}

impl StreamAcquirer {
    pub fn new(host: Arc<dyn CaptureHost>, loopback_marker: &str, echo_cancellation: bool) -> Self {
        Self {
            resolver: DeviceResolver::new(Arc::clone(&host), loopback_marker),
            host,
            echo_cancellation,
            streams: None,
        }
    }

    pub fn resolver(&self) -> &DeviceResolver {
        &self.resolver
    }

    pub fn streams(&self) -> Option<&AcquiredStreams> {
        self.streams.as_ref()
    }

    /// Return live, enabled streams.
    ///
    /// On failure nothing new is retained. Live streams held from an earlier
    /// start are kept; ended ones are released before the new open either way.
    pub async fn acquire(&mut self) -> Result<AcquiredStreams, CaptureError> {
        if let Some(streams) = &self.streams {
            if streams.is_live() {
                streams.set_enabled(true);
                info!("Reusing existing microphone and loopback streams");
                return Ok(streams.clone());
            }

            warn!("Held capture streams have ended, acquiring new ones");
            streams.stop();
            self.streams = None;
        }

        let (microphone, loopback) = futures::future::join(
            self.host
                .open_stream(CaptureRequest::microphone(self.echo_cancellation)),
            self.resolver.open_loopback(),
        )
        .await;

        let streams = match (microphone, loopback) {
            (Ok(microphone), Ok(loopback)) => AcquiredStreams {
                microphone,
                loopback,
            },
            (Ok(microphone), Err(e)) => {
                microphone.stop();
                return Err(e);
            }
            (Err(e), Ok(loopback)) => {
                loopback.stop();
                return Err(e);
            }
            (Err(e), Err(other)) => {
                warn!("Loopback acquisition also failed: {}", other);
                return Err(e);
            }
        };

        info!("New microphone and loopback streams obtained");
        self.streams = Some(streams.clone());
        Ok(streams)
    }

    /// Disable every track without releasing devices
    pub fn pause(&self) {
        if let Some(streams) = &self.streams {
            streams.set_enabled(false);
        }
    }

    /// Stop every track and forget the streams
    pub fn release(&mut self) {
        if let Some(streams) = self.streams.take() {
            streams.stop();
            info!("Capture streams released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioBackendConfig, Signal, SyntheticDevice, SyntheticHost};

    fn acquirer(host: &Arc<SyntheticHost>) -> StreamAcquirer {
        StreamAcquirer::new(host.clone(), "blackhole", true)
    }

    #[tokio::test]
    async fn test_live_streams_are_reenabled() {
        let host = Arc::new(SyntheticHost::blackhole_rig(AudioBackendConfig::default()));
        let mut acquirer = acquirer(&host);

        let first = acquirer.acquire().await.unwrap();
        acquirer.pause();
        assert!(!first.microphone.tracks()[0].is_enabled());

        let second = acquirer.acquire().await.unwrap();
        assert_eq!(first.microphone.id(), second.microphone.id());
        assert!(second.microphone.tracks()[0].is_enabled());
        assert!(second.loopback.tracks()[0].is_enabled());
        assert_eq!(host.opens(), 2);
    }

    #[tokio::test]
    async fn test_ended_stream_replaces_both() {
        let host = Arc::new(SyntheticHost::blackhole_rig(AudioBackendConfig::default()));
        let mut acquirer = acquirer(&host);

        let first = acquirer.acquire().await.unwrap();
        first.loopback.stop();

        let second = acquirer.acquire().await.unwrap();
        assert_ne!(first.microphone.id(), second.microphone.id());
        assert!(!first.microphone.is_live());
        assert_eq!(host.opens(), 4);
    }

    #[tokio::test]
    async fn test_partial_failure_retains_nothing() {
        let host = Arc::new(SyntheticHost::new(
            AudioBackendConfig::default(),
            vec![SyntheticDevice::new("Built-in Microphone", Signal::Silence)],
        ));
        let mut acquirer = acquirer(&host);

        let err = acquirer.acquire().await.unwrap_err();
        assert!(matches!(err, CaptureError::DeviceNotFound(_)));
        assert!(acquirer.streams().is_none());
    }

    #[tokio::test]
    async fn test_release_stops_tracks() {
        let host = Arc::new(SyntheticHost::blackhole_rig(AudioBackendConfig::default()));
        let mut acquirer = acquirer(&host);

        let streams = acquirer.acquire().await.unwrap();
        acquirer.release();

        assert!(acquirer.streams().is_none());
        assert!(!streams.microphone.is_live());
        assert!(!streams.loopback.is_live());
    }
}
