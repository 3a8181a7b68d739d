//! Shopping orchestrator error taxonomy.

use ap2::error::{Failure, FailureClass, FailureInfo};
use ap2::mandate::MandateError;
use uuid::Uuid;

use crate::peer::PeerError;
use crate::state::PurchaseState;

/// Errors raised by orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum ShoppingError {
    /// No purchase exists with the given id.
    #[error("no purchase {0}")]
    UnknownPurchase(Uuid),

    /// The operation expects a different purchase state.
    ///
    /// This is also how stale continuations die: a replay against an
    /// abandoned or advanced chain fails here without touching state.
    #[error("operation requires state {expected}, purchase is in {actual}")]
    WrongState {
        /// The state the operation runs from.
        expected: PurchaseState,
        /// The purchase's current state.
        actual: PurchaseState,
    },

    /// The peer's response did not correlate with the request.
    #[error("response correlation failed: {0}")]
    Correlation(String),

    /// The peer's response envelope failed signature verification.
    #[error("response envelope signature is invalid")]
    BadSignature,

    /// The peer answered with an unexpected payload kind.
    #[error("expected {expected:?} payload, peer answered {actual:?}")]
    UnexpectedPayload {
        /// The action the operation expected.
        expected: &'static str,
        /// The action the peer sent.
        actual: &'static str,
    },

    /// The peer rejected the operation; the embedded class drives retry.
    #[error("peer rejected the operation: {}", .0.message)]
    Rejected(FailureInfo),

    /// The merchant found no matching products.
    #[error("no products matched the query")]
    NoProductsFound,

    /// The selected product is not among the found products.
    #[error("product {0:?} is not among the found products")]
    ProductNotOffered(String),

    /// The purchase record is missing a chain artifact its state implies.
    #[error("purchase is missing its {0} record")]
    ChainIncomplete(&'static str),

    /// A mandate-chain precondition was rejected locally.
    #[error(transparent)]
    Mandate(#[from] MandateError),

    /// The exchange with the peer failed below the protocol.
    #[error(transparent)]
    Peer(#[from] PeerError),
}

impl Failure for ShoppingError {
    fn class(&self) -> FailureClass {
        match self {
            Self::Rejected(info) => info.class,
            Self::Mandate(err) => err.class(),
            Self::UnknownPurchase(_)
            | Self::WrongState { .. }
            | Self::ProductNotOffered(_)
            | Self::ChainIncomplete(_) => FailureClass::Precondition,
            Self::Correlation(_) | Self::BadSignature | Self::UnexpectedPayload { .. } => {
                FailureClass::Malformed
            }
            Self::NoProductsFound | Self::Peer(_) => FailureClass::Transient,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownPurchase(_) => "unknown_purchase",
            Self::WrongState { .. } => "wrong_state",
            Self::Correlation(_) => "correlation_failed",
            Self::BadSignature => "bad_signature",
            Self::UnexpectedPayload { .. } => "unexpected_payload",
            Self::Rejected(_) => "peer_rejected",
            Self::NoProductsFound => "no_products_found",
            Self::ProductNotOffered(_) => "product_not_offered",
            Self::ChainIncomplete(_) => "chain_incomplete",
            Self::Mandate(err) => err.error_code(),
            Self::Peer(_) => "peer_unreachable",
        }
    }
}
