//! HTTP-facing error mapping for the AP2 service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use ap2::envelope::EnvelopeError;
use ap2::error::Failure;

/// Errors that reject a request before it reaches a service.
///
/// Protocol failures past this point ride inside response envelopes; only
/// structural problems with the inbound envelope surface as HTTP errors.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The request body failed envelope validation.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::Envelope(EnvelopeError::UnknownSender(_)) => {
                (StatusCode::FORBIDDEN, "unknown_sender")
            }
            Self::Envelope(EnvelopeError::MalformedEnvelope(_)) => {
                (StatusCode::BAD_REQUEST, "malformed_envelope")
            }
        };
        let body = serde_json::json!({
            "status": "error",
            "error_code": code,
            "class": match &self {
                Self::Envelope(err) => err.class(),
            },
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_maps_to_bad_request() {
        let response =
            ServiceError::Envelope(EnvelopeError::MalformedEnvelope("missing field".into()))
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unknown_sender_maps_to_forbidden() {
        let response =
            ServiceError::Envelope(EnvelopeError::UnknownSender("impostor".into())).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
