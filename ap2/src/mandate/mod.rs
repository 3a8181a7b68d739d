//! The AP2 mandate chain: Intent → Cart → Payment.
//!
//! Each mandate is a signed, immutable record authorizing one step of an
//! agent-mediated purchase, cryptographically bound to its predecessor:
//!
//! - [`IntentMandate`] — the user's authorization for a human-not-present
//!   purchase of a described item, time-boxed and optionally restricted to a
//!   set of merchants.
//! - [`CartMandate`] — a concrete selection of items and quantities. Authored
//!   by the shopping agent, countersigned by the merchant as a fulfillment
//!   guarantee; signing freezes it.
//! - [`PaymentMandate`] — the user's authorization to move money for a signed
//!   cart, bound to a credential token and signed on the user's device.
//!
//! State transitions are enforced by the types themselves: an illegal
//! transition returns a [`MandateError`] and leaves the record untouched, so
//! a failed operation can never half-mutate a mandate.

mod cart;
mod intent;
mod payment;

pub use cart::{
    CartIssue, CartIssueReason, CartItem, CartMandate, CartStatus, CartValidation, Fulfillment,
    FulfillmentTerms,
};
pub use intent::{IntentMandate, IntentStatus, MerchantFilter};
pub use payment::{PaymentMandate, PaymentMandateStatus, UserDeviceSignature};

use crate::amount::Amount;
use crate::error::{Failure, FailureClass};

/// Errors raised by mandate-chain state transitions and invariant checks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MandateError {
    /// A transition was attempted from a state that does not allow it.
    #[error("invalid cart transition from {from} to {to}")]
    InvalidCartTransition {
        /// The cart's current status.
        from: CartStatus,
        /// The requested status.
        to: CartStatus,
    },

    /// The cart already carries a merchant signature; signing is one-way.
    #[error("cart mandate is already signed")]
    AlreadySigned,

    /// The operation requires a merchant-signed cart.
    #[error("cart mandate is not signed by a merchant")]
    CartNotSigned,

    /// The mandate's expiry has passed; the chain cannot be resumed.
    #[error("mandate expired")]
    Expired,

    /// The intent mandate does not allow the selected merchant.
    #[error("merchant {merchant_id:?} is not allowed by the intent mandate")]
    MerchantNotAllowed {
        /// The rejected merchant identifier.
        merchant_id: String,
    },

    /// The stated total does not match the priced cart.
    #[error("payment amount {actual} does not match priced cart total {expected}")]
    TotalMismatch {
        /// Cart total plus tax and shipping.
        expected: Amount,
        /// The amount the payment mandate stated.
        actual: Amount,
    },

    /// Summing line totals overflowed the settlement currency range.
    #[error("cart total overflows the settlement currency range")]
    AmountOverflow,
}

impl Failure for MandateError {
    fn class(&self) -> FailureClass {
        match self {
            Self::Expired => FailureClass::Terminal,
            Self::InvalidCartTransition { .. }
            | Self::AlreadySigned
            | Self::CartNotSigned
            | Self::MerchantNotAllowed { .. }
            | Self::TotalMismatch { .. } => FailureClass::Precondition,
            Self::AmountOverflow => FailureClass::Malformed,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCartTransition { .. } => "invalid_cart_transition",
            Self::AlreadySigned => "already_signed",
            Self::CartNotSigned => "cart_not_signed",
            Self::Expired => "mandate_expired",
            Self::MerchantNotAllowed { .. } => "merchant_not_allowed",
            Self::TotalMismatch { .. } => "total_mismatch",
            Self::AmountOverflow => "amount_overflow",
        }
    }
}
