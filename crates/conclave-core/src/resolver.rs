use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::errors::CallConnectError;
use crate::focus::Focus;
use crate::session::CallSession;

#[derive(Debug, Error)]
#[error("discovery lookup failed: {0}")]
pub struct DiscoveryError(pub String);

/// Looks up the backends a home-server domain publishes in its discovery
/// document.
#[async_trait]
pub trait DomainDiscovery: Send + Sync {
    async fn published_backends(&self, domain: &str) -> Result<Vec<Focus>, DiscoveryError>;
}

/// Builds the ordered candidate list of routing backends for a call.
pub struct FocusResolver {
    discovery: Arc<dyn DomainDiscovery>,
    /// Statically configured fallback credential-service URL, if any.
    fallback_service_url: Option<String>,
}

impl FocusResolver {
    pub fn new(discovery: Arc<dyn DomainDiscovery>, fallback_service_url: Option<String>) -> Self {
        Self {
            discovery,
            fallback_service_url,
        }
    }

    /// Produce the candidate foci for a call, most preferred first.
    ///
    /// Order: the focus the session already reports in use (keeps other
    /// participants anchored to it), the oldest membership's preferred foci,
    /// the home domain's published backends paired with this call's room
    /// alias, then the static fallback. The discovery document is looked up
    /// fresh on every call because the home server can change it; a failed
    /// lookup skips that source. An empty result is an error, never an empty
    /// list.
    pub async fn resolve(&self, session: &dyn CallSession) -> Result<Vec<Focus>, CallConnectError> {
        let mut candidates: Vec<Focus> = Vec::new();

        if let Some(active) = session.active_focus() {
            push_unique(&mut candidates, active);
        }

        for focus in session.oldest_membership_preferred_foci() {
            push_unique(&mut candidates, focus);
        }

        let room_alias = session.room_id();
        let domain = session.home_domain();
        match self.discovery.published_backends(&domain).await {
            Ok(published) => {
                for focus in published {
                    // Published entries advertise a service URL; the alias is
                    // always this call's room.
                    push_unique(
                        &mut candidates,
                        Focus::relay_sfu(focus.service_url(), room_alias.clone()),
                    );
                }
            }
            Err(e) => {
                tracing::warn!("backend discovery for {domain} failed, skipping: {e}");
            }
        }

        if let Some(url) = &self.fallback_service_url {
            push_unique(&mut candidates, Focus::relay_sfu(url.clone(), room_alias));
        }

        if candidates.is_empty() {
            tracing::warn!("no routing backend candidates for room {}", session.room_id());
            return Err(CallConnectError::NoFocusAvailable);
        }

        tracing::debug!("resolved {} focus candidate(s)", candidates.len());
        Ok(candidates)
    }
}

fn push_unique(candidates: &mut Vec<Focus>, focus: Focus) {
    if !candidates.contains(&focus) {
        candidates.push(focus);
    }
}
