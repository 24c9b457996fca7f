//! Conclave call-connection core.
//!
//! Client-side connection lifecycle for a multi-party, SFU-routed call:
//! routing-backend (focus) resolution, credential exchange, transport
//! connect and teardown, live focus switching, and mute-state
//! reconciliation. The protocol client, media transport, and UI are
//! collaborators behind traits; this crate owns only the lifecycle.

pub mod abort;
pub mod controller;
pub mod errors;
pub mod exchange;
pub mod focus;
pub mod mute;
pub mod resolver;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use controller::{ConnectionController, ConnectionState};
pub use errors::CallConnectError;
pub use exchange::{CredentialExchange, IdentityProvider, TokenExchanger};
pub use focus::{Focus, RelaySfuFocus, SfuConfig};
pub use mute::{MuteStateSynchronizer, MuteSyncConfig};
pub use resolver::{DomainDiscovery, FocusResolver};
pub use session::{CallSession, MuteIntent};
pub use transport::{ConnectTimeouts, SfuTransport, TrackKind, TransportState};
