//! Axum routes for the AP2 service.
//!
//! Each hosted peer exposes one A2A ingress endpoint: the body is a raw
//! envelope, validated through [`Envelope::receive`] exactly as a networked
//! peer would, and the response is the service's reply envelope.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use ap2::envelope::Envelope;
use ap2_credentials::CredentialsService;
use ap2_merchant::MerchantService;

use crate::error::ServiceError;

/// Shared application state: both hosted services.
#[derive(Clone)]
pub struct AppState {
    /// The merchant agent.
    pub merchant: Arc<MerchantService>,
    /// The credentials provider.
    pub credentials: Arc<CredentialsService>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

/// `POST /merchant/a2a` — Merchant A2A ingress.
///
/// # Errors
///
/// Returns 400 for malformed envelopes, 403 for unrecognized senders.
pub async fn merchant_a2a(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<Envelope>, ServiceError> {
    let envelope = Envelope::receive(&body)?;
    Ok(Json(state.merchant.handle(envelope).await))
}

/// `POST /credentials/a2a` — Credentials provider A2A ingress.
///
/// # Errors
///
/// Returns 400 for malformed envelopes, 403 for unrecognized senders.
pub async fn credentials_a2a(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<Envelope>, ServiceError> {
    let envelope = Envelope::receive(&body)?;
    Ok(Json(state.credentials.handle(envelope)))
}

/// `GET /health` — Liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Creates the service router with both A2A ingress endpoints.
pub fn service_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/merchant/a2a", axum::routing::post(merchant_a2a))
        .route("/credentials/a2a", axum::routing::post(credentials_a2a))
        .route("/health", axum::routing::get(health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap2::envelope::{AgentId, AgentTransfer, Payload};
    use ap2_credentials::directory::demo_directory;
    use ap2_merchant::catalog::demo_catalog;

    fn state() -> AppState {
        AppState {
            merchant: Arc::new(MerchantService::new(
                "tech_store_merchant",
                Arc::new(demo_catalog()),
            )),
            credentials: Arc::new(CredentialsService::new(Arc::new(demo_directory()))),
        }
    }

    #[tokio::test]
    async fn test_merchant_ingress_round_trip() {
        let request = Envelope::send(
            AgentId::ShoppingAgent,
            AgentId::MerchantAgent,
            Payload::AgentTransfer(AgentTransfer::handshake("hello", vec![])),
            None,
        );
        let body = serde_json::to_string(&request).unwrap();
        let Json(response) = merchant_a2a(State(state()), body).await.unwrap();
        assert_eq!(response.in_response_to, Some(request.message_id));
        assert_eq!(response.sender_agent, AgentId::MerchantAgent);
    }

    #[tokio::test]
    async fn test_ingress_rejects_garbage() {
        let err = merchant_a2a(State(state()), "{not an envelope".into())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Envelope(_)));
    }
}
