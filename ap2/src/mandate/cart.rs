//! Cart mandates: merchant-countersigned item selections.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

use super::MandateError;
use crate::amount::Amount;
use crate::signature::SignatureToken;
use crate::timestamp::UnixTimestamp;

/// One line item in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Catalog product identifier.
    pub item_id: String,
    /// Quantity requested.
    pub quantity: u32,
    /// Unit price quoted when the item was selected.
    pub unit_price: Amount,
}

impl CartItem {
    /// The line total, `unit_price × quantity`.
    #[must_use]
    pub fn line_total(&self) -> Option<Amount> {
        self.unit_price.checked_mul_quantity(self.quantity)
    }
}

/// Lifecycle of a cart mandate.
///
/// Transitions only move forward: `Draft → Validated → Signed → Fulfilled`,
/// with `Expired` reachable from any pre-fulfillment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    /// Items selected by the shopping agent; mutable.
    Draft,
    /// Merchant checked stock and pricing.
    Validated,
    /// Merchant countersignature attached; immutable from here.
    Signed,
    /// Order fulfilled after capture.
    Fulfilled,
    /// Expired before completion.
    Expired,
}

impl Display for CartStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Validated => "validated",
            Self::Signed => "signed",
            Self::Fulfilled => "fulfilled",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// Merchant commitments attached at signing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentTerms {
    /// Shipping commitment (e.g. `"2-3 business days"`).
    pub fulfillment_sla: String,
    /// Return window (e.g. `"30 days"`).
    pub return_policy: String,
    /// Warranty statement.
    pub warranty: String,
}

/// Why a cart line item failed merchant validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CartIssueReason {
    /// The product id is not in the catalog.
    ProductNotFound,
    /// Requested quantity exceeds available stock.
    InsufficientStock {
        /// Units currently available.
        available: u32,
        /// Units the cart requested.
        requested: u32,
    },
    /// The quoted unit price no longer matches the catalog.
    PriceChanged {
        /// The catalog's current unit price.
        current: Amount,
    },
}

/// A per-item validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartIssue {
    /// The offending line item's product id.
    pub item_id: String,
    /// What went wrong.
    #[serde(flatten)]
    pub reason: CartIssueReason,
}

/// Result of validating a cart against live catalog stock and pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartValidation {
    /// Whether every line item passed.
    pub valid: bool,
    /// Sum of line totals at current catalog prices.
    pub total_amount: Amount,
    /// Per-item failures; empty when `valid`.
    #[serde(default)]
    pub issues: Vec<CartIssue>,
}

impl CartValidation {
    /// A passing validation with the computed total.
    #[must_use]
    pub const fn passed(total_amount: Amount) -> Self {
        Self {
            valid: true,
            total_amount,
            issues: Vec::new(),
        }
    }

    /// A failing validation carrying the per-item issues.
    #[must_use]
    pub const fn failed(issues: Vec<CartIssue>) -> Self {
        Self {
            valid: false,
            total_amount: Amount::ZERO,
            issues,
        }
    }
}

/// Shipment record created by the merchant after capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fulfillment {
    /// Unique fulfillment identifier.
    pub fulfillment_id: Uuid,
    /// The fulfilled cart mandate.
    pub cart_mandate_id: Uuid,
    /// The fulfilling merchant.
    pub merchant_id: String,
    /// Carrier tracking number.
    pub tracking_number: String,
    /// Shipping method slug.
    pub shipping_method: String,
    /// When fulfillment was initiated.
    pub created_at: UnixTimestamp,
    /// Estimated ship date.
    pub estimated_shipping: UnixTimestamp,
}

/// A concrete item selection, countersigned by the merchant.
///
/// Jointly owned: the shopping agent authors the draft, the merchant signs
/// it. `total_amount` covers the items only — tax and shipping recorded at
/// cart-update time live on the derived payment mandate, so the merchant
/// signature stays valid after pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartMandate {
    /// Unique cart mandate identifier.
    pub cart_mandate_id: Uuid,
    /// The intent mandate this cart descends from.
    pub intent_mandate_id: Uuid,
    /// Selected line items.
    pub items: Vec<CartItem>,
    /// Sum of line totals (items only).
    pub total_amount: Amount,
    /// The countersigning merchant, set at signing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<String>,
    /// Merchant signature over
    /// `(merchant_id, total_amount, cart_mandate_id, signing_date)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_signature: Option<SignatureToken>,
    /// When the merchant signed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_signed_at: Option<UnixTimestamp>,
    /// Merchant commitments attached at signing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment_terms: Option<FulfillmentTerms>,
    /// Whether checkout needs credentials from the provider.
    pub requires_credentials: bool,
    /// Whether the order needs a shipping address.
    pub requires_shipping: bool,
    /// Current lifecycle state.
    pub status: CartStatus,
    /// Staleness window: a signed cart is never re-validated against live
    /// inventory before this deadline.
    pub expires_at: UnixTimestamp,
}

impl CartMandate {
    /// Drafts a cart from selected items, computing the items-only total.
    ///
    /// # Errors
    ///
    /// [`MandateError::AmountOverflow`] if summing line totals overflows.
    pub fn draft(
        intent_mandate_id: Uuid,
        items: Vec<CartItem>,
        ttl_secs: u64,
    ) -> Result<Self, MandateError> {
        let total_amount = Self::items_total(&items)?;
        Ok(Self {
            cart_mandate_id: Uuid::new_v4(),
            intent_mandate_id,
            items,
            total_amount,
            merchant_id: None,
            merchant_signature: None,
            merchant_signed_at: None,
            fulfillment_terms: None,
            requires_credentials: true,
            requires_shipping: true,
            status: CartStatus::Draft,
            expires_at: UnixTimestamp::now_plus(ttl_secs),
        })
    }

    /// Sums line totals for a slice of items.
    ///
    /// # Errors
    ///
    /// [`MandateError::AmountOverflow`] on overflow.
    pub fn items_total(items: &[CartItem]) -> Result<Amount, MandateError> {
        items.iter().try_fold(Amount::ZERO, |acc, item| {
            item.line_total()
                .and_then(|line| acc.checked_add(line))
                .ok_or(MandateError::AmountOverflow)
        })
    }

    /// Whether the cart's staleness window has passed as of `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: UnixTimestamp) -> bool {
        self.status == CartStatus::Expired || self.expires_at.is_expired_at(now)
    }

    /// Records a passing merchant validation: `Draft → Validated`.
    ///
    /// # Errors
    ///
    /// [`MandateError::InvalidCartTransition`] from any other state.
    pub fn mark_validated(&mut self) -> Result<(), MandateError> {
        match self.status {
            CartStatus::Draft => {
                self.status = CartStatus::Validated;
                Ok(())
            }
            from => Err(MandateError::InvalidCartTransition {
                from,
                to: CartStatus::Validated,
            }),
        }
    }

    /// Attaches the merchant countersignature: `Validated → Signed`.
    ///
    /// One-way: a signed cart refuses re-signing, and nothing downstream
    /// re-validates it against live inventory inside its staleness window.
    ///
    /// # Errors
    ///
    /// [`MandateError::AlreadySigned`] if a signature is present,
    /// [`MandateError::InvalidCartTransition`] from `Draft` or a terminal state.
    pub fn attach_merchant_signature(
        &mut self,
        merchant_id: impl Into<String>,
        signature: SignatureToken,
        terms: FulfillmentTerms,
        signed_at: UnixTimestamp,
    ) -> Result<(), MandateError> {
        if self.merchant_signature.is_some() {
            return Err(MandateError::AlreadySigned);
        }
        if self.status != CartStatus::Validated {
            return Err(MandateError::InvalidCartTransition {
                from: self.status,
                to: CartStatus::Signed,
            });
        }
        self.merchant_id = Some(merchant_id.into());
        self.merchant_signature = Some(signature);
        self.merchant_signed_at = Some(signed_at);
        self.fulfillment_terms = Some(terms);
        self.status = CartStatus::Signed;
        Ok(())
    }

    /// Marks the order fulfilled: `Signed → Fulfilled`.
    ///
    /// # Errors
    ///
    /// [`MandateError::CartNotSigned`] if no merchant signature is attached.
    pub fn mark_fulfilled(&mut self) -> Result<(), MandateError> {
        if self.status != CartStatus::Signed {
            return Err(MandateError::CartNotSigned);
        }
        self.status = CartStatus::Fulfilled;
        Ok(())
    }

    /// Checks the signed-cart total invariant:
    /// `sum(unit_price × quantity) == total_amount`.
    ///
    /// # Errors
    ///
    /// [`MandateError::TotalMismatch`] if the stored total diverges.
    pub fn verify_total(&self) -> Result<(), MandateError> {
        let computed = Self::items_total(&self.items)?;
        if computed == self.total_amount {
            Ok(())
        } else {
            Err(MandateError::TotalMismatch {
                expected: computed,
                actual: self.total_amount,
            })
        }
    }
}
