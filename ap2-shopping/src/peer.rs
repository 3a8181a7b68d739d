//! Envelope-level peer interfaces.
//!
//! The orchestrator talks to its peers strictly in envelopes: one request
//! out, one response back. The traits here are the transport seam — the
//! in-process implementations below run the peer service directly (and still
//! push every request through [`Envelope::receive`] so the wire contract is
//! exercised), while a networked deployment substitutes an HTTP client
//! without the orchestrator noticing.

use std::sync::Arc;

use async_trait::async_trait;

use ap2::envelope::{Envelope, EnvelopeError};
use ap2_credentials::CredentialsService;
use ap2_merchant::MerchantService;

/// Errors below the protocol: the exchange itself failed, no response
/// envelope exists. Protocol-level failures always arrive as well-formed
/// envelopes with failure payloads instead.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// The peer could not be reached or did not answer.
    #[error("peer transport failed: {0}")]
    Transport(String),

    /// The request failed the peer's structural validation.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// The merchant side of the A2A conversation.
#[async_trait]
pub trait MerchantPeer: Send + Sync {
    /// Delivers a request envelope and returns the peer's response envelope.
    async fn exchange(&self, envelope: Envelope) -> Result<Envelope, PeerError>;
}

/// The credentials provider side of the A2A conversation.
#[async_trait]
pub trait CredentialsPeer: Send + Sync {
    /// Delivers a request envelope and returns the peer's response envelope.
    async fn exchange(&self, envelope: Envelope) -> Result<Envelope, PeerError>;
}

/// Runs the merchant service in-process.
#[derive(Clone)]
pub struct LocalMerchantPeer {
    service: Arc<MerchantService>,
}

impl std::fmt::Debug for LocalMerchantPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMerchantPeer").finish_non_exhaustive()
    }
}

impl LocalMerchantPeer {
    /// Wraps a merchant service as a peer.
    #[must_use]
    pub fn new(service: Arc<MerchantService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MerchantPeer for LocalMerchantPeer {
    async fn exchange(&self, envelope: Envelope) -> Result<Envelope, PeerError> {
        let raw = serde_json::to_string(&envelope)
            .map_err(|e| PeerError::Transport(e.to_string()))?;
        let received = Envelope::receive(&raw)?;
        Ok(self.service.handle(received).await)
    }
}

/// Runs the credentials provider in-process.
#[derive(Clone)]
pub struct LocalCredentialsPeer {
    service: Arc<CredentialsService>,
}

impl std::fmt::Debug for LocalCredentialsPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCredentialsPeer").finish_non_exhaustive()
    }
}

impl LocalCredentialsPeer {
    /// Wraps a credentials service as a peer.
    #[must_use]
    pub fn new(service: Arc<CredentialsService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl CredentialsPeer for LocalCredentialsPeer {
    async fn exchange(&self, envelope: Envelope) -> Result<Envelope, PeerError> {
        let raw = serde_json::to_string(&envelope)
            .map_err(|e| PeerError::Transport(e.to_string()))?;
        let received = Envelope::receive(&raw)?;
        Ok(self.service.handle(received))
    }
}
