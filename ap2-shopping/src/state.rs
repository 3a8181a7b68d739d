//! The per-purchase state machine.
//!
//! States only move forward. Every operation names the state it expects and
//! refuses to run from any other, so a stale or replayed continuation is a
//! no-op rather than a corruption. Failure states are terminal: once a chain
//! reaches one, only a fresh intent mandate starts a new purchase.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Progress of one purchase through the mandate chain.
///
/// The declaration order is the protocol order: the derived `Ord` lets
/// callers ask "has this purchase reached state X" with a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseState {
    /// Intent mandate created and signed by the user.
    IntentCreated,
    /// Merchant returned matching products.
    ProductsFound,
    /// The user selected an item; a draft cart exists.
    CartSelected,
    /// The merchant countersigned the cart.
    CartSigned,
    /// Shipping address obtained from the credentials provider.
    CredentialsObtained,
    /// Tax and shipping recorded; grand total fixed.
    CartPriced,
    /// Payment methods obtained from the credentials provider.
    PaymentMethodsObtained,
    /// A credential token was issued for the chosen method.
    TokenIssued,
    /// The payment mandate was derived from the signed cart.
    PaymentMandateCreated,
    /// The user signed the payment mandate on their device.
    UserSigned,
    /// The signed mandate was transmitted; a payment session exists.
    Transmitted,
    /// Authorization is pending the user's OTP.
    OtpPending,
    /// Captured; the purchase is complete.
    Completed,
    /// Terminal: the merchant refused the cart.
    CartInvalid,
    /// Terminal: authorization declined or OTP attempts exhausted.
    OtpFailed,
    /// Terminal: a mandate, session, or OTP window expired.
    Expired,
    /// Terminal: a party abandoned the chain before capture.
    Abandoned,
}

impl PurchaseState {
    /// Whether this state ends the chain.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CartInvalid | Self::OtpFailed | Self::Expired | Self::Abandoned
        )
    }

    /// Whether this state is a terminal failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.is_terminal() && !matches!(self, Self::Completed)
    }

    /// The single happy-path successor, if one exists.
    #[must_use]
    pub const fn next(&self) -> Option<Self> {
        match self {
            Self::IntentCreated => Some(Self::ProductsFound),
            Self::ProductsFound => Some(Self::CartSelected),
            Self::CartSelected => Some(Self::CartSigned),
            Self::CartSigned => Some(Self::CredentialsObtained),
            Self::CredentialsObtained => Some(Self::CartPriced),
            Self::CartPriced => Some(Self::PaymentMethodsObtained),
            Self::PaymentMethodsObtained => Some(Self::TokenIssued),
            Self::TokenIssued => Some(Self::PaymentMandateCreated),
            Self::PaymentMandateCreated => Some(Self::UserSigned),
            Self::UserSigned => Some(Self::Transmitted),
            Self::Transmitted => Some(Self::OtpPending),
            Self::OtpPending => Some(Self::Completed),
            Self::Completed
            | Self::CartInvalid
            | Self::OtpFailed
            | Self::Expired
            | Self::Abandoned => None,
        }
    }
}

impl Display for PurchaseState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::IntentCreated => "intent_created",
            Self::ProductsFound => "products_found",
            Self::CartSelected => "cart_selected",
            Self::CartSigned => "cart_signed",
            Self::CredentialsObtained => "credentials_obtained",
            Self::CartPriced => "cart_priced",
            Self::PaymentMethodsObtained => "payment_methods_obtained",
            Self::TokenIssued => "token_issued",
            Self::PaymentMandateCreated => "payment_mandate_created",
            Self::UserSigned => "user_signed",
            Self::Transmitted => "transmitted",
            Self::OtpPending => "otp_pending",
            Self::Completed => "completed",
            Self::CartInvalid => "cart_invalid",
            Self::OtpFailed => "otp_failed",
            Self::Expired => "expired",
            Self::Abandoned => "abandoned",
        };
        write!(f, "{s}")
    }
}
