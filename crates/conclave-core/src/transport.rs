use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

/// Media track kinds this core reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Microphone,
    Camera,
    ScreenShare,
}

/// Handle to a locally captured track.
///
/// Opaque to this crate beyond kind and source; the transport owns the
/// underlying capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub sid: String,
    pub kind: TrackKind,
    pub source: TrackSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackPublication {
    pub sid: String,
}

/// Which capture kinds to acquire.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackRequest {
    pub audio: bool,
    pub video: bool,
}

/// Peer/signaling timeouts handed through to the transport's connect,
/// overridable for diagnostics. This crate adds no timeout layer of its own
/// beyond abort-on-teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectTimeouts {
    pub peer: Duration,
    pub signaling: Duration,
}

impl Default for ConnectTimeouts {
    fn default() -> Self {
        Self {
            peer: Duration::from_secs(15),
            signaling: Duration::from_secs(10),
        }
    }
}

/// State reported by the transport's own connection machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The connect handshake failed. `status` carries the backend's status
    /// signal when one was available.
    #[error("transport connect failed (status {status:?}): {message}")]
    Connect {
        status: Option<u16>,
        message: String,
    },
    /// Capture device access denied by the user or platform.
    #[error("device permission denied: {0}")]
    PermissionDenied(String),
    #[error("transport operation failed: {0}")]
    Other(String),
}

/// Capability surface of the SFU media transport.
///
/// Encoding, adaptive bitrate, and the network stack live behind the
/// implementation; this crate only drives the connection lifecycle.
#[async_trait]
pub trait SfuTransport: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        token: &str,
        timeouts: &ConnectTimeouts,
    ) -> Result<(), TransportError>;

    async fn disconnect(&self);

    /// Acquire local capture devices without publishing them.
    async fn create_tracks(&self, request: TrackRequest) -> Result<Vec<LocalTrack>, TransportError>;

    async fn publish_track(&self, track: LocalTrack) -> Result<TrackPublication, TransportError>;

    /// Stop a local capture acquired with `create_tracks`.
    async fn stop_track(&self, track: &LocalTrack);

    /// Silence or un-silence a local track, published or not.
    async fn mute_track(&self, track: &LocalTrack, muted: bool) -> Result<(), TransportError>;

    /// Enable or disable the published track of a kind, acquiring a capture
    /// if the transport needs one (e.g. camera on with no prior video track).
    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool)
        -> Result<(), TransportError>;

    /// Transport-reported enabled state for a kind; `false` when nothing of
    /// that kind is published.
    fn track_enabled(&self, kind: TrackKind) -> bool;

    /// Clones of the currently published screen-share tracks, for carrying
    /// across a focus switch.
    fn clone_screenshare_tracks(&self) -> Vec<LocalTrack>;

    async fn switch_active_device(
        &self,
        kind: TrackKind,
        device_id: &str,
    ) -> Result<(), TransportError>;

    /// Latest-value channel mirroring the transport's connection state.
    fn state_changes(&self) -> watch::Receiver<TransportState>;
}
