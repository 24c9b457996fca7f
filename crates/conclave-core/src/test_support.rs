//! Mock collaborators shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};

use crate::errors::CallConnectError;
use crate::exchange::{CredentialExchange, IdentityError, IdentityProvider};
use crate::focus::{Focus, SfuConfig};
use crate::resolver::{DiscoveryError, DomainDiscovery};
use crate::session::CallSession;
use crate::transport::{
    ConnectTimeouts, LocalTrack, SfuTransport, TrackKind, TrackPublication, TrackRequest,
    TrackSource, TransportError, TransportState,
};

/// Poll a condition until it holds, failing the test after ~2 seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within timeout");
}

pub struct MockSession {
    room: String,
    domain: String,
    device: String,
    active: watch::Sender<Option<Focus>>,
    membership_foci: Mutex<Vec<Focus>>,
}

impl MockSession {
    pub fn new(room: &str, domain: &str) -> Self {
        let (active, _) = watch::channel(None);
        Self {
            room: room.to_string(),
            domain: domain.to_string(),
            device: "DEVICE01".to_string(),
            active,
            membership_foci: Mutex::new(Vec::new()),
        }
    }

    pub fn with_active_focus(self, focus: Focus) -> Self {
        self.active.send_replace(Some(focus));
        self
    }

    pub fn with_membership_foci(self, foci: Vec<Focus>) -> Self {
        *self.membership_foci.lock().unwrap() = foci;
        self
    }

    pub fn set_active_focus(&self, focus: Focus) {
        self.active.send_replace(Some(focus));
    }
}

impl CallSession for MockSession {
    fn room_id(&self) -> String {
        self.room.clone()
    }

    fn home_domain(&self) -> String {
        self.domain.clone()
    }

    fn device_id(&self) -> String {
        self.device.clone()
    }

    fn active_focus(&self) -> Option<Focus> {
        self.active.borrow().clone()
    }

    fn oldest_membership_preferred_foci(&self) -> Vec<Focus> {
        self.membership_foci.lock().unwrap().clone()
    }

    fn active_focus_changes(&self) -> watch::Receiver<Option<Focus>> {
        self.active.subscribe()
    }
}

pub struct MockDiscovery {
    result: Result<Vec<Focus>, String>,
    lookups: AtomicUsize,
}

impl MockDiscovery {
    pub fn publishing(backends: Vec<Focus>) -> Self {
        Self {
            result: Ok(backends),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            result: Err(reason.to_string()),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DomainDiscovery for MockDiscovery {
    async fn published_backends(&self, _domain: &str) -> Result<Vec<Focus>, DiscoveryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.result
            .clone()
            .map_err(DiscoveryError)
    }
}

pub struct MockIdentity {
    result: Result<String, String>,
}

impl MockIdentity {
    pub fn ok(token: &str) -> Self {
        Self {
            result: Ok(token.to_string()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            result: Err(reason.to_string()),
        }
    }
}

#[async_trait]
impl IdentityProvider for MockIdentity {
    async fn identity_token(&self) -> Result<String, IdentityError> {
        self.result.clone().map_err(IdentityError)
    }
}

/// Scripted credential exchange keyed by focus service URL.
pub struct MockExchange {
    results: Mutex<HashMap<String, Result<SfuConfig, CallConnectError>>>,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    pub fn script(&self, service_url: &str, result: Result<SfuConfig, CallConnectError>) {
        self.results
            .lock()
            .unwrap()
            .insert(service_url.to_string(), result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Hold the next `exchange` call open until the returned gate is
    /// notified.
    pub fn gate_exchange(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl CredentialExchange for MockExchange {
    async fn exchange(
        &self,
        _session: &dyn CallSession,
        focus: &Focus,
    ) -> Result<SfuConfig, CallConnectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.results
            .lock()
            .unwrap()
            .get(focus.service_url())
            .cloned()
            .unwrap_or_else(|| {
                Err(CallConnectError::RoutingCredential {
                    service_url: focus.service_url().to_string(),
                    reason: "no credentials scripted".into(),
                })
            })
    }
}

/// Recording transport with scriptable failures and optional gates that hold
/// an operation open until the test releases it.
pub struct MockTransport {
    state: watch::Sender<TransportState>,
    connect_calls: AtomicUsize,
    connected_urls: Mutex<Vec<String>>,
    disconnect_calls: AtomicUsize,
    create_tracks_calls: AtomicUsize,
    published: Mutex<Vec<LocalTrack>>,
    stopped: Mutex<Vec<LocalTrack>>,
    muted: Mutex<Vec<(String, bool)>>,
    toggles: Mutex<Vec<(TrackKind, bool)>>,
    enabled_audio: AtomicBool,
    enabled_video: AtomicBool,
    toggle_applies: AtomicBool,
    toggle_failure: Mutex<Option<TransportError>>,
    connect_failure: Mutex<Option<TransportError>>,
    create_gate: Mutex<Option<Arc<Notify>>>,
    connect_gate: Mutex<Option<Arc<Notify>>>,
    screenshares: Mutex<Vec<LocalTrack>>,
    device_switches: Mutex<Vec<(TrackKind, String)>>,
    next_sid: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        let (state, _) = watch::channel(TransportState::Disconnected);
        Self {
            state,
            connect_calls: AtomicUsize::new(0),
            connected_urls: Mutex::new(Vec::new()),
            disconnect_calls: AtomicUsize::new(0),
            create_tracks_calls: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            muted: Mutex::new(Vec::new()),
            toggles: Mutex::new(Vec::new()),
            enabled_audio: AtomicBool::new(false),
            enabled_video: AtomicBool::new(false),
            toggle_applies: AtomicBool::new(true),
            toggle_failure: Mutex::new(None),
            connect_failure: Mutex::new(None),
            create_gate: Mutex::new(None),
            connect_gate: Mutex::new(None),
            screenshares: Mutex::new(Vec::new()),
            device_switches: Mutex::new(Vec::new()),
            next_sid: AtomicUsize::new(0),
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn connected_urls(&self) -> Vec<String> {
        self.connected_urls.lock().unwrap().clone()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn create_tracks_calls(&self) -> usize {
        self.create_tracks_calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<LocalTrack> {
        self.published.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<LocalTrack> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn toggle_calls(&self, kind: TrackKind) -> usize {
        self.toggles
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub fn device_switches(&self) -> Vec<(TrackKind, String)> {
        self.device_switches.lock().unwrap().clone()
    }

    pub fn set_toggle_applies(&self, applies: bool) {
        self.toggle_applies.store(applies, Ordering::SeqCst);
    }

    pub fn fail_toggles(&self, err: TransportError) {
        *self.toggle_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_connect(&self, err: TransportError) {
        *self.connect_failure.lock().unwrap() = Some(err);
    }

    /// Hold the next `create_tracks` call open until the returned gate is
    /// notified.
    pub fn gate_create_tracks(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.create_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Hold the next `connect` call open until the returned gate is notified.
    pub fn gate_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.connect_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Drive the transport-reported connection state directly.
    pub fn set_state(&self, state: TransportState) {
        self.state.send_replace(state);
    }

    /// Pretend a screen-share track is already captured and published.
    pub fn seed_screenshare(&self) -> LocalTrack {
        let track = LocalTrack {
            sid: format!("screen-{}", self.next_sid.fetch_add(1, Ordering::SeqCst)),
            kind: TrackKind::Video,
            source: TrackSource::ScreenShare,
        };
        self.screenshares.lock().unwrap().push(track.clone());
        self.published.lock().unwrap().push(track.clone());
        track
    }

    fn was_muted(&self, sid: &str) -> bool {
        self.muted
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(s, _)| s == sid)
            .map(|(_, muted)| *muted)
            .unwrap_or(false)
    }

    fn set_enabled(&self, kind: TrackKind, enabled: bool) {
        match kind {
            TrackKind::Audio => self.enabled_audio.store(enabled, Ordering::SeqCst),
            TrackKind::Video => self.enabled_video.store(enabled, Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl SfuTransport for MockTransport {
    async fn connect(
        &self,
        url: &str,
        _token: &str,
        _timeouts: &ConnectTimeouts,
    ) -> Result<(), TransportError> {
        let gate = self.connect_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.connect_failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.connected_urls.lock().unwrap().push(url.to_string());
        self.state.send_replace(TransportState::Connected);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(TransportState::Disconnected);
    }

    async fn create_tracks(&self, request: TrackRequest) -> Result<Vec<LocalTrack>, TransportError> {
        self.create_tracks_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.create_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut tracks = Vec::new();
        if request.audio {
            tracks.push(LocalTrack {
                sid: format!("audio-{}", self.next_sid.fetch_add(1, Ordering::SeqCst)),
                kind: TrackKind::Audio,
                source: TrackSource::Microphone,
            });
        }
        if request.video {
            tracks.push(LocalTrack {
                sid: format!("video-{}", self.next_sid.fetch_add(1, Ordering::SeqCst)),
                kind: TrackKind::Video,
                source: TrackSource::Camera,
            });
        }
        Ok(tracks)
    }

    async fn publish_track(&self, track: LocalTrack) -> Result<TrackPublication, TransportError> {
        self.set_enabled(track.kind, !self.was_muted(&track.sid));
        let publication = TrackPublication {
            sid: format!("pub-{}", track.sid),
        };
        self.published.lock().unwrap().push(track);
        Ok(publication)
    }

    async fn stop_track(&self, track: &LocalTrack) {
        self.stopped.lock().unwrap().push(track.clone());
    }

    async fn mute_track(&self, track: &LocalTrack, muted: bool) -> Result<(), TransportError> {
        self.muted.lock().unwrap().push((track.sid.clone(), muted));
        Ok(())
    }

    async fn set_track_enabled(
        &self,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.toggles.lock().unwrap().push((kind, enabled));
        if let Some(err) = self.toggle_failure.lock().unwrap().clone() {
            return Err(err);
        }
        if self.toggle_applies.load(Ordering::SeqCst) {
            self.set_enabled(kind, enabled);
        }
        Ok(())
    }

    fn track_enabled(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.enabled_audio.load(Ordering::SeqCst),
            TrackKind::Video => self.enabled_video.load(Ordering::SeqCst),
        }
    }

    fn clone_screenshare_tracks(&self) -> Vec<LocalTrack> {
        self.screenshares.lock().unwrap().clone()
    }

    async fn switch_active_device(
        &self,
        kind: TrackKind,
        device_id: &str,
    ) -> Result<(), TransportError> {
        self.device_switches
            .lock()
            .unwrap()
            .push((kind, device_id.to_string()));
        Ok(())
    }

    fn state_changes(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }
}
