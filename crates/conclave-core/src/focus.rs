use serde::{Deserialize, Serialize};

/// One candidate media-routing backend ("focus") a call can use.
///
/// Tagged by backend type so other routing architectures can be added later
/// without touching callers; only the relay-SFU type exists today. Foci are
/// immutable value objects with structural equality, produced fresh on every
/// resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Focus {
    #[serde(rename = "relay_sfu")]
    RelaySfu(RelaySfuFocus),
}

impl Focus {
    pub fn relay_sfu(service_url: impl Into<String>, room_alias: impl Into<String>) -> Self {
        Focus::RelaySfu(RelaySfuFocus {
            service_url: service_url.into(),
            room_alias: room_alias.into(),
        })
    }

    /// Base URL of the backend's credential service.
    pub fn service_url(&self) -> &str {
        match self {
            Focus::RelaySfu(f) => &f.service_url,
        }
    }

    /// Room alias the backend will route media for.
    pub fn room_alias(&self) -> &str {
        match self {
            Focus::RelaySfu(f) => &f.room_alias,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySfuFocus {
    pub service_url: String,
    pub room_alias: String,
}

/// Routing credentials for one focus, as returned by its credential service.
///
/// Superseded by a fresh config on every new attempt or focus switch, never
/// mutated in place; discarded on disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SfuConfig {
    /// WebSocket URL of the SFU itself.
    pub url: String,
    /// Access token scoped to the room alias.
    pub token: String,
}

impl SfuConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.url.is_empty() && !self.token.is_empty()
    }
}
