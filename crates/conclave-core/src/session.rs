use tokio::sync::watch;

use crate::focus::Focus;

/// Caller-requested mute intent.
///
/// Owned by the UI layer and read-only to this crate: the core converges the
/// transport's published state to it, never the reverse. The one exception is
/// a permission-denied correction, which is reported back over a channel for
/// the owner to apply (see `MuteStateSynchronizer`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuteIntent {
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl Default for MuteIntent {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            video_enabled: false,
        }
    }
}

/// The call session this core connects media for.
///
/// Implemented by the surrounding protocol layer; this crate never parses
/// room membership events itself. Passed explicitly to whichever component
/// needs it, never held as a process-wide singleton.
pub trait CallSession: Send + Sync {
    /// Protocol-level room identifier. Doubles as the room alias when pairing
    /// a discovered backend with this call.
    fn room_id(&self) -> String;

    /// Domain whose published discovery document advertises backends.
    fn home_domain(&self) -> String;

    /// This client's device identifier, sent with the credential exchange.
    fn device_id(&self) -> String;

    /// Focus currently reported in use by the session, if any.
    fn active_focus(&self) -> Option<Focus>;

    /// Foci preferred by the oldest membership in the session.
    fn oldest_membership_preferred_foci(&self) -> Vec<Focus>;

    /// Latest-value channel carrying active-focus changes. Dropping the
    /// receiver unsubscribes.
    fn active_focus_changes(&self) -> watch::Receiver<Option<Focus>>;
}
