use thiserror::Error;

use crate::transport::TransportError;

/// Failures surfaced by the connection core.
///
/// Cancellation is deliberately absent: an aborted attempt resolves silently.
#[derive(Debug, Clone, Error)]
pub enum CallConnectError {
    /// No candidate routing backend from any source. The call cannot be
    /// joined from this client; surfaced as "call not supported".
    #[error("no media routing backend available for this call")]
    NoFocusAvailable,

    /// The identity provider could not produce a token. Always fatal to the
    /// attempt; retries with backoff live behind the provider.
    #[error("identity token request failed: {0}")]
    IdentityToken(String),

    /// Credential exchange against one focus failed. Not retried against the
    /// same focus; the controller advances to the next candidate instead.
    #[error("credential exchange with {service_url} failed: {reason}")]
    RoutingCredential { service_url: String, reason: String },

    /// The backend refused the connection because it is out of track or
    /// session capacity. Transient; worth retrying later.
    #[error("routing backend has insufficient capacity")]
    InsufficientCapacity,

    /// Any other connect failure, with the transport cause attached.
    #[error("connection failed")]
    Unknown(#[source] TransportError),
}
