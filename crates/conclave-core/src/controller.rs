use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::abort::{AbortHandle, AbortRegistry};
use crate::errors::CallConnectError;
use crate::exchange::CredentialExchange;
use crate::focus::{Focus, SfuConfig};
use crate::mute::{MuteStateSynchronizer, MuteSyncConfig};
use crate::resolver::FocusResolver;
use crate::session::{CallSession, MuteIntent};
use crate::transport::{
    ConnectTimeouts, LocalTrack, SfuTransport, TrackKind, TrackRequest, TransportError,
    TransportState,
};

/// Connection lifecycle state as observed by the caller.
///
/// Derived, never set directly: the join of whether a focus switch is in
/// progress, whether the initial connect sequence is in flight, and the
/// transport's own reported state. Exactly one is observable at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No valid routing credentials yet.
    Waiting,
    Connecting,
    Connected,
    Reconnecting,
    SwitchingFocus,
    Disconnected,
}

/// Status signals a relay SFU emits when it has hit its track or session
/// limits.
const CAPACITY_STATUS: [u16; 3] = [503, 200, 429];

enum AttemptOutcome {
    Completed,
    Aborted,
}

#[derive(Default)]
struct Inner {
    current_config: Option<SfuConfig>,
    /// Latest switch request that arrived while a switch was underway.
    pending_switch: Option<SfuConfig>,
    connecting: bool,
    switching: bool,
    /// Whether any attempt has ever had valid credentials; before that the
    /// derived state is `Waiting`.
    seen_valid_config: bool,
}

/// The connection state machine at the center of the core.
///
/// Owns transition logic between waiting/connecting/connected/switching/
/// disconnected, pre-creates local capture ahead of transport connection,
/// reacts to backend changes with a live focus switch, and classifies
/// transport failures. One instance per call view; teardown cancels every
/// in-flight attempt.
pub struct ConnectionController {
    transport: Arc<dyn SfuTransport>,
    resolver: FocusResolver,
    exchange: Arc<dyn CredentialExchange>,
    timeouts: ConnectTimeouts,
    mute_config: MuteSyncConfig,
    aborts: AbortRegistry,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    error_tx: watch::Sender<Option<CallConnectError>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    corrections: std::sync::Mutex<Option<mpsc::UnboundedReceiver<TrackKind>>>,
    torn_down: AtomicBool,
}

impl ConnectionController {
    pub fn new(
        transport: Arc<dyn SfuTransport>,
        resolver: FocusResolver,
        exchange: Arc<dyn CredentialExchange>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Waiting);
        let (error_tx, _) = watch::channel(None);
        Self {
            transport,
            resolver,
            exchange,
            timeouts: ConnectTimeouts::default(),
            mute_config: MuteSyncConfig::default(),
            aborts: AbortRegistry::new(),
            inner: Mutex::new(Inner::default()),
            state_tx,
            error_tx,
            tasks: std::sync::Mutex::new(Vec::new()),
            corrections: std::sync::Mutex::new(None),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Override the peer/signaling timeouts handed to the transport.
    pub fn with_timeouts(mut self, timeouts: ConnectTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_mute_config(mut self, config: MuteSyncConfig) -> Self {
        self.mute_config = config;
        self
    }

    /// Current observable connection state.
    pub fn conn_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Last connection failure, surfaced as observable state so the UI can
    /// render recovery actions. Cleared on a successful connect.
    pub fn last_error(&self) -> Option<CallConnectError> {
        self.error_tx.borrow().clone()
    }

    pub fn error_changes(&self) -> watch::Receiver<Option<CallConnectError>> {
        self.error_tx.subscribe()
    }

    /// Routing credentials currently in use, if connected.
    pub async fn sfu_config(&self) -> Option<SfuConfig> {
        self.inner.lock().await.current_config.clone()
    }

    /// Channel of permission-denied mute corrections; the intent owner should
    /// apply each reported kind as "disabled". Yields the receiver once.
    pub fn mute_corrections(&self) -> Option<mpsc::UnboundedReceiver<TrackKind>> {
        self.corrections.lock().unwrap().take()
    }

    pub async fn switch_active_device(
        &self,
        kind: TrackKind,
        device_id: &str,
    ) -> Result<(), CallConnectError> {
        self.transport
            .switch_active_device(kind, device_id)
            .await
            .map_err(CallConnectError::Unknown)
    }

    /// Resolve a routing backend for the call, obtain credentials, and drive
    /// the transport through connect and publish.
    ///
    /// Idempotent: a call while already connecting or connected with a
    /// value-equal config does nothing. Candidate foci are tried in
    /// preference order; a credential failure against one advances to the
    /// next, an identity failure is fatal. The whole sequence runs under one
    /// abort handle, so teardown cancels it even while resolution or the
    /// credential exchange is still awaiting.
    pub async fn connect(
        self: &Arc<Self>,
        session: Arc<dyn CallSession>,
        intent: watch::Receiver<MuteIntent>,
    ) -> Result<(), CallConnectError> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (id, handle) = self.aborts.register();
        let result = self.connect_inner(&handle, session, intent).await;
        self.aborts.complete(&id);
        result
    }

    async fn connect_inner(
        self: &Arc<Self>,
        handle: &AbortHandle,
        session: Arc<dyn CallSession>,
        intent: watch::Receiver<MuteIntent>,
    ) -> Result<(), CallConnectError> {
        let candidates = match self.resolver.resolve(session.as_ref()).await {
            Ok(candidates) => candidates,
            Err(e) => {
                self.record_error(&e);
                return Err(e);
            }
        };
        if handle.is_aborted() {
            return Ok(());
        }

        let mut last_failure: Option<CallConnectError> = None;
        for focus in candidates {
            let config = match self.exchange.exchange(session.as_ref(), &focus).await {
                Ok(config) if config.is_valid() => config,
                Ok(_) => {
                    last_failure = Some(CallConnectError::RoutingCredential {
                        service_url: focus.service_url().to_string(),
                        reason: "credential service returned empty url or token".into(),
                    });
                    continue;
                }
                Err(e @ CallConnectError::RoutingCredential { .. }) => {
                    tracing::warn!("{e}; trying next candidate");
                    last_failure = Some(e);
                    continue;
                }
                Err(e) => {
                    self.record_error(&e);
                    return Err(e);
                }
            };
            if handle.is_aborted() {
                return Ok(());
            }

            {
                let inner = self.inner.lock().await;
                let state = *self.state_tx.borrow();
                if inner.current_config.as_ref() == Some(&config)
                    && matches!(
                        state,
                        ConnectionState::Connecting | ConnectionState::Connected
                    )
                {
                    tracing::debug!("already connected with this config, nothing to do");
                    return Ok(());
                }
            }

            return self.run_attempt(handle, session, intent, config).await;
        }

        let err = last_failure.unwrap_or(CallConnectError::NoFocusAvailable);
        self.record_error(&err);
        Err(err)
    }

    /// Hang up: cancel anything in flight and drop the transport connection.
    pub async fn disconnect(&self) {
        self.aborts.abort_all();
        self.transport.disconnect().await;
        {
            let mut inner = self.inner.lock().await;
            inner.current_config = None;
            inner.pending_switch = None;
        }
        self.publish_state().await;
    }

    /// Migrate the live call to a different focus without ending it.
    ///
    /// Entered only while connected. The new config is supplied directly;
    /// resolution is not repeated. Published screen-share tracks are carried
    /// across (capture cannot be re-acquired without a user gesture); the
    /// microphone is not re-created, so already initialized hardware is not
    /// re-prompted.
    pub async fn switch_focus(&self, config: SfuConfig) -> Result<(), CallConnectError> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut inner = self.inner.lock().await;
            if inner.switching {
                // Switch requests normally arrive on one serialized stream,
                // but that is not structurally guaranteed; overlapping
                // requests queue and only the latest one matters.
                inner.pending_switch = Some(config);
                return Ok(());
            }
            if inner.current_config.as_ref() == Some(&config) {
                tracing::debug!("switch requested to the config already in use, nothing to do");
                return Ok(());
            }
            let state = *self.state_tx.borrow();
            if state != ConnectionState::Connected {
                tracing::warn!("focus switch requested while {state:?}, ignoring");
                return Ok(());
            }
            inner.switching = true;
        }
        self.publish_state().await;

        let mut next = Some(config);
        let mut result = Ok(());
        while let Some(target) = next {
            let outcome = self.perform_switch(&target).await;
            let mut inner = self.inner.lock().await;
            match outcome {
                Ok(AttemptOutcome::Completed) => {
                    inner.current_config = Some(target);
                    result = Ok(());
                }
                Ok(AttemptOutcome::Aborted) => {
                    result = Ok(());
                }
                Err(e) => {
                    result = Err(e);
                }
            }
            // Anything queued mid-switch is compared by value against the
            // config now in use; stale duplicates are dropped. After
            // teardown the queue is discarded outright, otherwise a parked
            // request would reconnect with a fresh handle the teardown
            // never saw.
            next = if self.torn_down.load(Ordering::SeqCst) {
                inner.pending_switch = None;
                None
            } else {
                inner
                    .pending_switch
                    .take()
                    .filter(|pending| inner.current_config.as_ref() != Some(pending))
            };
            if next.is_none() {
                inner.switching = false;
            }
        }
        self.publish_state().await;

        if let Err(e) = &result {
            self.record_error(e);
        }
        result
    }

    /// Cancel every in-flight attempt and stop background tasks. Invoked when
    /// the owning scope ends; also runs from `Drop` as a safety net.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("controller teardown: aborting outstanding attempts");
        self.aborts.close();
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    async fn run_attempt(
        self: &Arc<Self>,
        handle: &AbortHandle,
        session: Arc<dyn CallSession>,
        intent: watch::Receiver<MuteIntent>,
        config: SfuConfig,
    ) -> Result<(), CallConnectError> {
        {
            let mut inner = self.inner.lock().await;
            inner.connecting = true;
            inner.seen_valid_config = true;
        }
        self.publish_state().await;

        let requested = *intent.borrow();
        let outcome = self.initial_attempt(handle, &config, requested).await;

        {
            let mut inner = self.inner.lock().await;
            inner.connecting = false;
            if matches!(outcome, Ok(AttemptOutcome::Completed)) {
                inner.current_config = Some(config);
            }
        }
        self.publish_state().await;

        match outcome {
            Ok(AttemptOutcome::Completed) => {
                self.error_tx.send_replace(None);
                self.ensure_background_tasks(session, intent);
                Ok(())
            }
            // An aborted attempt resolves silently; cancellation is not an
            // error.
            Ok(AttemptOutcome::Aborted) => Ok(()),
            Err(e) => {
                self.record_error(&e);
                Err(e)
            }
        }
    }

    /// One initial connection attempt: capture, mute application, connect,
    /// publish. The abort flag is checked after every await; once observed,
    /// the attempt stops whatever it acquired and unwinds without performing
    /// the next step.
    async fn initial_attempt(
        &self,
        handle: &AbortHandle,
        config: &SfuConfig,
        intent: MuteIntent,
    ) -> Result<AttemptOutcome, CallConnectError> {
        // The microphone is captured ahead of connect even when the user
        // starts muted: the backend only forwards a track once published and
        // keeps the capture session open for hardware mode signaling, so
        // muted means publish-then-silence, never don't-capture.
        let tracks = self
            .transport
            .create_tracks(TrackRequest {
                audio: true,
                video: false,
            })
            .await
            .map_err(CallConnectError::Unknown)?;
        let mic = tracks.into_iter().find(|t| t.kind == TrackKind::Audio);

        if handle.is_aborted() {
            self.stop_if_present(mic.as_ref()).await;
            return Ok(AttemptOutcome::Aborted);
        }

        if let Some(track) = &mic {
            if !intent.audio_enabled {
                if let Err(e) = self.transport.mute_track(track, true).await {
                    tracing::warn!("pre-publish mute failed: {e}");
                }
                if handle.is_aborted() {
                    self.stop_if_present(mic.as_ref()).await;
                    return Ok(AttemptOutcome::Aborted);
                }
            }
        }

        self.connect_and_publish(handle, config, mic, Vec::new())
            .await
    }

    /// Shared tail of the initial attempt and a focus switch: connect to the
    /// focus and publish whatever tracks this attempt carries.
    async fn connect_and_publish(
        &self,
        handle: &AbortHandle,
        config: &SfuConfig,
        mic: Option<LocalTrack>,
        screenshares: Vec<LocalTrack>,
    ) -> Result<AttemptOutcome, CallConnectError> {
        // Never start the connect after observing abort, even if it would
        // have begun synchronously.
        if handle.is_aborted() {
            self.stop_if_present(mic.as_ref()).await;
            return Ok(AttemptOutcome::Aborted);
        }

        if let Err(e) = self
            .transport
            .connect(&config.url, &config.token, &self.timeouts)
            .await
        {
            self.stop_if_present(mic.as_ref()).await;
            return Err(classify_connect_error(e));
        }

        if handle.is_aborted() {
            self.transport.disconnect().await;
            self.stop_if_present(mic.as_ref()).await;
            return Ok(AttemptOutcome::Aborted);
        }

        if let Some(track) = mic {
            if let Err(e) = self.transport.publish_track(track.clone()).await {
                self.transport.stop_track(&track).await;
                self.transport.disconnect().await;
                return Err(classify_connect_error(e));
            }
            if handle.is_aborted() {
                self.transport.disconnect().await;
                return Ok(AttemptOutcome::Aborted);
            }
        }

        // Screen-share republish is best effort: a failed clone publish must
        // not fail the switch.
        for track in screenshares {
            if let Err(e) = self.transport.publish_track(track).await {
                tracing::warn!("republish of screen-share track failed: {e}");
            }
        }

        Ok(AttemptOutcome::Completed)
    }

    async fn perform_switch(
        &self,
        config: &SfuConfig,
    ) -> Result<AttemptOutcome, CallConnectError> {
        let (id, handle) = self.aborts.register();
        let screenshares = self.transport.clone_screenshare_tracks();
        tracing::info!(
            "switching focus to {}: carrying {} screen-share track(s)",
            config.url,
            screenshares.len()
        );
        self.transport.disconnect().await;
        let outcome = self
            .connect_and_publish(&handle, config, None, screenshares)
            .await;
        self.aborts.complete(&id);
        outcome
    }

    fn ensure_background_tasks(
        self: &Arc<Self>,
        session: Arc<dyn CallSession>,
        intent: watch::Receiver<MuteIntent>,
    ) {
        let mut tasks = self.tasks.lock().unwrap();
        if !tasks.is_empty() {
            return;
        }

        let focus_rx = session.active_focus_changes();
        let transport_rx = self.transport.state_changes();
        let weak = Arc::downgrade(self);
        tasks.push(tokio::spawn(async move {
            Self::event_loop(weak, session, focus_rx, transport_rx).await;
        }));

        let sync = MuteStateSynchronizer::new(
            self.transport.clone(),
            self.state_tx.subscribe(),
            intent,
            self.mute_config.clone(),
        );
        let (sync_tasks, corrections) = sync.spawn();
        tasks.extend(sync_tasks);
        *self.corrections.lock().unwrap() = Some(corrections);
    }

    /// The single serialized stream of session focus changes and transport
    /// state changes. Holds only a weak reference so a dropped controller is
    /// not kept alive by its own loop.
    async fn event_loop(
        this: Weak<Self>,
        session: Arc<dyn CallSession>,
        mut focus_rx: watch::Receiver<Option<Focus>>,
        mut transport_rx: watch::Receiver<TransportState>,
    ) {
        loop {
            tokio::select! {
                changed = focus_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let new_focus = focus_rx.borrow_and_update().clone();
                    let Some(controller) = this.upgrade() else { break };
                    if let Some(focus) = new_focus {
                        controller
                            .handle_active_focus_change(session.as_ref(), focus)
                            .await;
                    }
                }
                changed = transport_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let transport_state = *transport_rx.borrow_and_update();
                    let Some(controller) = this.upgrade() else { break };
                    if transport_state == TransportState::Disconnected {
                        let mut inner = controller.inner.lock().await;
                        if !inner.switching {
                            // The config is no longer current once the
                            // transport ends the attempt; a fresh attempt
                            // re-enters via Connecting.
                            inner.current_config = None;
                        }
                    }
                    controller.publish_state().await;
                }
            }
        }
        tracing::debug!("controller event loop ended");
    }

    async fn handle_active_focus_change(&self, session: &dyn CallSession, focus: Focus) {
        let state = *self.state_tx.borrow();
        if state != ConnectionState::Connected {
            tracing::debug!("ignoring active-focus change while {state:?}");
            return;
        }
        tracing::info!("session active focus changed to {}", focus.service_url());

        match self.exchange.exchange(session, &focus).await {
            Ok(config) if config.is_valid() => {
                if let Err(e) = self.switch_focus(config).await {
                    tracing::warn!("focus switch failed: {e}");
                }
            }
            Ok(_) => {
                tracing::warn!("ignoring invalid credentials from {}", focus.service_url());
            }
            Err(e) => {
                tracing::warn!("credential exchange for new focus failed: {e}");
                self.record_error(&e);
            }
        }
    }

    async fn stop_if_present(&self, track: Option<&LocalTrack>) {
        if let Some(track) = track {
            self.transport.stop_track(track).await;
        }
    }

    async fn publish_state(&self) {
        let state = {
            let inner = self.inner.lock().await;
            let transport = *self.transport.state_changes().borrow();
            derive_state(&inner, transport)
        };
        if self.state_tx.send_replace(state) != state {
            tracing::info!("connection state -> {state:?}");
        }
    }

    fn record_error(&self, err: &CallConnectError) {
        tracing::warn!("connection error: {err}");
        self.error_tx.send_replace(Some(err.clone()));
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn derive_state(inner: &Inner, transport: TransportState) -> ConnectionState {
    if inner.switching {
        ConnectionState::SwitchingFocus
    } else if inner.connecting {
        ConnectionState::Connecting
    } else if !inner.seen_valid_config {
        ConnectionState::Waiting
    } else {
        match transport {
            TransportState::Disconnected => ConnectionState::Disconnected,
            TransportState::Connecting => ConnectionState::Connecting,
            TransportState::Connected => ConnectionState::Connected,
            TransportState::Reconnecting => ConnectionState::Reconnecting,
        }
    }
}

/// Classify a failure at the transport-connect boundary. Known capacity
/// status signals become the retryable "try again later" condition; anything
/// else is wrapped with its cause for diagnostics.
fn classify_connect_error(err: TransportError) -> CallConnectError {
    match &err {
        TransportError::Connect {
            status: Some(status),
            ..
        } if CAPACITY_STATUS.contains(status) => CallConnectError::InsufficientCapacity,
        _ => CallConnectError::Unknown(err),
    }
}
