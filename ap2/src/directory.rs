//! User reference data owned by the credentials provider.
//!
//! Profiles, shipping addresses, and payment methods are read-mostly records
//! keyed by user email. Each address and payment-method collection has exactly
//! one entry with the `default` flag set — an invariant enforced when the
//! collection is written, never patched up at read time. When a caller-supplied
//! filter eliminates the stored default, [`effective_default`] promotes the
//! first remaining entry for that response only.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timestamp::UnixTimestamp;

/// Account verification level, an input to risk scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    /// Identity not yet verified.
    Unverified,
    /// Identity verified by the credentials provider.
    Verified,
}

/// A user profile record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Stable user identifier.
    pub user_id: String,
    /// Full display name.
    pub full_name: String,
    /// Account email, the lookup key.
    pub email: String,
    /// Contact phone number.
    pub phone: String,
    /// Account creation time.
    pub account_created: UnixTimestamp,
    /// Account status (`"active"` for usable accounts).
    pub account_status: String,
    /// Verification level for risk scoring.
    pub verification_level: VerificationLevel,
}

/// A shipping address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Stable address identifier.
    pub address_id: String,
    /// Recipient name.
    pub recipient: String,
    /// Street address, first line.
    pub address_line_1: String,
    /// Street address, second line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line_2: Option<String>,
    /// City.
    pub city: String,
    /// State or region code.
    pub state: String,
    /// Postal code.
    pub zip_code: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
    /// Whether this is the user's stored default address.
    #[serde(rename = "default")]
    pub is_default: bool,
}

/// What a payment method can be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Can fund a purchase.
    Purchase,
    /// Can receive a refund.
    Refund,
}

/// Instrument-specific payment method details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instrument {
    /// A credit card.
    CreditCard {
        /// Card brand slug (e.g. `"american_express"`).
        brand: String,
        /// Last four digits of the card number.
        last_four: String,
        /// Expiry month (1–12).
        exp_month: u8,
        /// Expiry year (four digits).
        exp_year: u16,
        /// Cardholder name.
        cardholder_name: String,
        /// Billing country, ISO 3166-1 alpha-2.
        billing_country: String,
    },
    /// A bank account for ACH-style transfers.
    BankAccount {
        /// Bank display name.
        bank_name: String,
        /// Account type (`"checking"` or `"savings"`).
        account_type: String,
        /// Last four digits of the account number.
        account_last_four: String,
        /// Last four digits of the routing number.
        routing_last_four: String,
        /// Account holder name.
        account_holder_name: String,
    },
}

impl Instrument {
    /// The brand slug used for merchant acceptance filtering.
    ///
    /// Bank accounts have no card brand and never match a brand filter.
    #[must_use]
    pub fn brand(&self) -> Option<&str> {
        match self {
            Self::CreditCard { brand, .. } => Some(brand),
            Self::BankAccount { .. } => None,
        }
    }
}

/// A stored payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    /// Stable payment method identifier (e.g. `"pm_amex_8888"`).
    pub payment_method_id: String,
    /// The underlying instrument.
    #[serde(flatten)]
    pub instrument: Instrument,
    /// Whether this is the user's stored default method.
    #[serde(rename = "default")]
    pub is_default: bool,
    /// Whether the instrument has been verified.
    pub verified: bool,
    /// What the method can be used for.
    pub capabilities: Vec<Capability>,
}

/// A single-use credential token authorizing payment operations against one
/// payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialToken {
    /// Stable token identifier.
    pub credential_token_id: Uuid,
    /// The opaque token value carried by the payment mandate.
    pub token: String,
    /// The payment method this token is bound to.
    pub payment_method_id: String,
    /// The owning user's email.
    pub user_email: String,
    /// Operations this token authorizes.
    pub scope: Vec<String>,
    /// Tokens are consumed by their first successful use.
    pub single_use: bool,
    /// Issuance time.
    pub generated_at: UnixTimestamp,
    /// Expiry time (one hour after issuance).
    pub expires_at: UnixTimestamp,
}

/// Selects the effective default from an already-filtered collection.
///
/// If the stored default survived the filter it wins; otherwise the first
/// remaining item is promoted for this response only. Stored preference is
/// never mutated by a read.
#[must_use]
pub fn effective_default<T, F: Fn(&T) -> bool>(items: &[T], is_default: F) -> Option<&T> {
    items.iter().find(|i| is_default(i)).or_else(|| items.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(id: &str, brand: &str, is_default: bool) -> PaymentMethod {
        PaymentMethod {
            payment_method_id: id.into(),
            instrument: Instrument::CreditCard {
                brand: brand.into(),
                last_four: "0000".into(),
                exp_month: 12,
                exp_year: 2027,
                cardholder_name: "Bugs Bunny".into(),
                billing_country: "US".into(),
            },
            is_default,
            verified: true,
            capabilities: vec![Capability::Purchase, Capability::Refund],
        }
    }

    #[test]
    fn test_effective_default_prefers_stored_flag() {
        let methods = vec![method("pm_a", "visa", false), method("pm_b", "amex", true)];
        let chosen = effective_default(&methods, |m| m.is_default).unwrap();
        assert_eq!(chosen.payment_method_id, "pm_b");
    }

    #[test]
    fn test_effective_default_promotes_first_when_filtered_out() {
        // Stored default was eliminated by a brand filter; first survivor wins.
        let methods = vec![method("pm_a", "visa", false), method("pm_c", "visa", false)];
        let chosen = effective_default(&methods, |m| m.is_default).unwrap();
        assert_eq!(chosen.payment_method_id, "pm_a");
    }

    #[test]
    fn test_effective_default_empty() {
        let methods: Vec<PaymentMethod> = vec![];
        assert!(effective_default(&methods, |m| m.is_default).is_none());
    }

    #[test]
    fn test_payment_method_wire_shape() {
        let json = serde_json::to_value(method("pm_amex_8888", "american_express", true)).unwrap();
        assert_eq!(json["type"], "credit_card");
        assert_eq!(json["default"], true);
        assert_eq!(json["brand"], "american_express");
    }
}
