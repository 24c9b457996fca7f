use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::controller::ConnectionState;
use crate::session::MuteIntent;
use crate::transport::{SfuTransport, TrackKind, TransportError};

/// Tuning for the reconciliation loop. Tests shrink the delays.
#[derive(Debug, Clone)]
pub struct MuteSyncConfig {
    /// Iterations before giving up on a toggle that refuses to converge.
    pub max_iterations: u32,
    /// Wait after a successful toggle for transport-reported state to catch
    /// up before re-checking.
    pub settle_delay: Duration,
    /// Wait before retrying after a transient failure.
    pub retry_delay: Duration,
}

impl Default for MuteSyncConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            settle_delay: Duration::from_millis(50),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Keeps the transport's published mute state converged to the caller's
/// intent while the call is connected.
///
/// One loop per track kind, so a stuck camera toggle cannot starve the
/// microphone, and at most one reconciliation per kind is ever in flight.
/// The transport's mute state is not authoritative while connecting or
/// switching focus, so reconciliation only runs in `Connected`. Failures
/// degrade UX but never abort the call.
pub struct MuteStateSynchronizer {
    transport: Arc<dyn SfuTransport>,
    conn_state: watch::Receiver<ConnectionState>,
    intent: watch::Receiver<MuteIntent>,
    config: MuteSyncConfig,
}

impl MuteStateSynchronizer {
    pub fn new(
        transport: Arc<dyn SfuTransport>,
        conn_state: watch::Receiver<ConnectionState>,
        intent: watch::Receiver<MuteIntent>,
        config: MuteSyncConfig,
    ) -> Self {
        Self {
            transport,
            conn_state,
            intent,
            config,
        }
    }

    /// Spawn the per-kind reconciliation tasks.
    ///
    /// Returns the task handles plus the channel over which permission-denied
    /// corrections are reported: the caller owns the intent, so the core asks
    /// it to force a kind to disabled instead of writing intent itself.
    pub fn spawn(self) -> (Vec<JoinHandle<()>>, mpsc::UnboundedReceiver<TrackKind>) {
        let (correction_tx, correction_rx) = mpsc::unbounded_channel();
        let mut tasks = Vec::new();
        for kind in [TrackKind::Audio, TrackKind::Video] {
            let transport = self.transport.clone();
            let conn_state = self.conn_state.clone();
            let intent = self.intent.clone();
            let config = self.config.clone();
            let corrections = correction_tx.clone();
            tasks.push(tokio::spawn(async move {
                run_kind(kind, transport, conn_state, intent, config, corrections).await;
            }));
        }
        (tasks, correction_rx)
    }
}

async fn run_kind(
    kind: TrackKind,
    transport: Arc<dyn SfuTransport>,
    mut conn_state: watch::Receiver<ConnectionState>,
    mut intent: watch::Receiver<MuteIntent>,
    config: MuteSyncConfig,
    corrections: mpsc::UnboundedSender<TrackKind>,
) {
    loop {
        while *conn_state.borrow_and_update() != ConnectionState::Connected {
            if conn_state.changed().await.is_err() {
                return;
            }
        }

        reconcile(kind, &transport, &conn_state, &intent, &config, &corrections).await;

        tokio::select! {
            changed = intent.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            changed = conn_state.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

/// One bounded reconciliation pass for a track kind.
///
/// An explicit loop with an iteration counter, so the convergence bound is
/// visible: hardware that refuses to toggle must not spin the process.
async fn reconcile(
    kind: TrackKind,
    transport: &Arc<dyn SfuTransport>,
    conn_state: &watch::Receiver<ConnectionState>,
    intent: &watch::Receiver<MuteIntent>,
    config: &MuteSyncConfig,
    corrections: &mpsc::UnboundedSender<TrackKind>,
) {
    for _ in 0..config.max_iterations {
        if *conn_state.borrow() != ConnectionState::Connected {
            return;
        }

        // Re-read every iteration: intent may have changed during an await.
        let desired = enabled_for(kind, *intent.borrow());
        if transport.track_enabled(kind) == desired {
            return;
        }

        match transport.set_track_enabled(kind, desired).await {
            Ok(()) => {
                tokio::time::sleep(config.settle_delay).await;
            }
            Err(TransportError::PermissionDenied(reason)) => {
                // Reflect reality back to the user instead of retrying into
                // a denial.
                tracing::warn!("{kind:?} toggle denied ({reason}), forcing intent to disabled");
                let _ = corrections.send(kind);
                return;
            }
            Err(e) => {
                tracing::warn!("{kind:?} toggle failed ({e}), retrying after delay");
                tokio::time::sleep(config.retry_delay).await;
            }
        }
    }

    tracing::warn!(
        "{kind:?} mute state failed to converge after {} attempts, giving up",
        config.max_iterations
    );
}

fn enabled_for(kind: TrackKind, intent: MuteIntent) -> bool {
    match kind {
        TrackKind::Audio => intent.audio_enabled,
        TrackKind::Video => intent.video_enabled,
    }
}
