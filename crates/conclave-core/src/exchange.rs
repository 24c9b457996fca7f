use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::errors::CallConnectError;
use crate::focus::{Focus, SfuConfig};
use crate::session::CallSession;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct IdentityError(pub String);

/// Produces short-lived identity assertions proving this client's protocol
/// identity to a focus. Retries with backoff are the implementation's
/// concern, not this crate's.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn identity_token(&self) -> Result<String, IdentityError>;
}

/// Credential exchange against one chosen focus.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(
        &self,
        session: &dyn CallSession,
        focus: &Focus,
    ) -> Result<SfuConfig, CallConnectError>;
}

/// Request body for a focus's credential service.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SfuTokenRequest<'a> {
    room: &'a str,
    identity_token: &'a str,
    device_id: &'a str,
}

/// Exchanges an identity token for routing credentials over HTTP.
///
/// A failure against one focus is not retried here: the caller should move on
/// to the next candidate rather than hammer the same service.
pub struct TokenExchanger {
    http: reqwest::Client,
    identity: Arc<dyn IdentityProvider>,
}

impl TokenExchanger {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            identity,
        }
    }

    fn credential_endpoint(focus: &Focus) -> Result<Url, CallConnectError> {
        let base = format!("{}/sfu/get", focus.service_url().trim_end_matches('/'));
        Url::parse(&base).map_err(|e| CallConnectError::RoutingCredential {
            service_url: focus.service_url().to_string(),
            reason: format!("invalid service url: {e}"),
        })
    }
}

#[async_trait]
impl CredentialExchange for TokenExchanger {
    async fn exchange(
        &self,
        session: &dyn CallSession,
        focus: &Focus,
    ) -> Result<SfuConfig, CallConnectError> {
        let identity_token = self
            .identity
            .identity_token()
            .await
            .map_err(|e| CallConnectError::IdentityToken(e.to_string()))?;

        let endpoint = Self::credential_endpoint(focus)?;
        let failed = |reason: String| CallConnectError::RoutingCredential {
            service_url: focus.service_url().to_string(),
            reason,
        };

        let device_id = session.device_id();
        let body = SfuTokenRequest {
            room: focus.room_alias(),
            identity_token: &identity_token,
            device_id: &device_id,
        };

        tracing::info!("requesting routing credentials from {endpoint}");

        let resp = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(failed(format!(
                "credential service returned status {}",
                resp.status()
            )));
        }

        let config: SfuConfig = resp
            .json()
            .await
            .map_err(|e| failed(format!("invalid credential response: {e}")))?;

        Ok(config)
    }
}
