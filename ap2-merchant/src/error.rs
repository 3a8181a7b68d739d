//! Merchant error taxonomy.

use ap2::error::{Failure, FailureClass};
use ap2::mandate::{CartValidation, MandateError};

/// Errors raised by merchant operations.
#[derive(Debug, thiserror::Error)]
pub enum MerchantError {
    /// The product id is not in the catalog.
    #[error("product {0:?} not found in catalog")]
    ProductNotFound(String),

    /// Requested quantity exceeds available-to-sell stock.
    ///
    /// Transient: stock may free up when another hold lapses.
    #[error("insufficient stock for {item_id:?}: available {available}, requested {requested}")]
    InsufficientStock {
        /// The short line item.
        item_id: String,
        /// Units currently available.
        available: u32,
        /// Units requested.
        requested: u32,
    },

    /// The cart failed validation and cannot be signed.
    #[error("cannot sign invalid cart mandate")]
    InvalidCart {
        /// The failing validation, for the response payload.
        validation: CartValidation,
    },

    /// The cart's staleness window has passed.
    #[error("cart mandate expired")]
    CartExpired,

    /// Fulfillment was requested for a cart this merchant never signed.
    #[error("cart mandate is not signed by this merchant")]
    CartNotSigned,

    /// Fulfillment was requested without a completed capture.
    #[error("capture is not completed")]
    CaptureIncomplete,

    /// No reservation exists for the cart.
    #[error("no inventory reservation for this cart")]
    ReservationNotFound,

    /// The reservation lapsed before fulfillment.
    #[error("inventory reservation expired")]
    ReservationExpired,

    /// A mandate-chain transition was rejected.
    #[error(transparent)]
    Mandate(#[from] MandateError),

    /// The request payload does not match any merchant operation.
    #[error("unsupported payload action {0:?} for merchant agent")]
    UnsupportedAction(&'static str),
}

impl Failure for MerchantError {
    fn class(&self) -> FailureClass {
        match self {
            Self::InsufficientStock { .. } => FailureClass::Transient,
            Self::CartExpired | Self::ReservationExpired => FailureClass::Terminal,
            Self::ProductNotFound(_)
            | Self::InvalidCart { .. }
            | Self::CartNotSigned
            | Self::CaptureIncomplete
            | Self::ReservationNotFound => FailureClass::Precondition,
            Self::Mandate(err) => err.class(),
            Self::UnsupportedAction(_) => FailureClass::Malformed,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::ProductNotFound(_) => "product_not_found",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::InvalidCart { .. } => "invalid_cart",
            Self::CartExpired => "cart_expired",
            Self::CartNotSigned => "cart_not_signed",
            Self::CaptureIncomplete => "capture_incomplete",
            Self::ReservationNotFound => "reservation_not_found",
            Self::ReservationExpired => "reservation_expired",
            Self::Mandate(err) => err.error_code(),
            Self::UnsupportedAction(_) => "unsupported_action",
        }
    }
}
