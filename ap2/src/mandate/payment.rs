//! Payment mandates: user-signed authorization to move money.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cart::{CartMandate, CartStatus};
use super::MandateError;
use crate::amount::Amount;
use crate::signature::SignatureToken;
use crate::timestamp::UnixTimestamp;

/// Lifecycle of a payment mandate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMandateStatus {
    /// Created by the shopping agent, not yet signed by the user.
    Created,
    /// Signed on the user's device.
    UserSigned,
    /// Transmitted to the credentials provider.
    Transmitted,
    /// Settled through capture.
    Completed,
    /// Terminally failed (declined, expired, or abandoned).
    Failed,
}

/// The signature produced on the user's device over a payment mandate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDeviceSignature {
    /// Unique signature record identifier.
    pub signature_id: Uuid,
    /// The signed payment mandate.
    pub payment_mandate_id: Uuid,
    /// The signature token, computed over
    /// `(payment_mandate_id, total_amount, device_id)`.
    pub signature: SignatureToken,
    /// When the user signed.
    pub signed_at: UnixTimestamp,
    /// The signing device.
    pub device_id: String,
}

/// Authorization to pay the priced total of one signed cart.
///
/// A payment mandate can only be derived from a cart that is merchant-signed
/// and inside its staleness window, and its amount must equal the cart's
/// items total plus the tax and shipping recorded at cart-update time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMandate {
    /// Unique payment mandate identifier.
    pub payment_mandate_id: Uuid,
    /// The signed cart this mandate pays for.
    pub cart_mandate_id: Uuid,
    /// The merchant bound from the signed cart, an input to risk scoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<String>,
    /// Priced total: cart items total + tax + shipping.
    pub total_amount: Amount,
    /// The credential token funding the payment.
    pub payment_token: String,
    /// Set once signed on the user's device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_signature: Option<UserDeviceSignature>,
    /// Whether settlement requires an OTP challenge.
    pub requires_otp: bool,
    /// Current lifecycle state.
    pub status: PaymentMandateStatus,
    /// Creation time.
    pub created_at: UnixTimestamp,
}

impl PaymentMandate {
    /// Derives a payment mandate from a signed cart.
    ///
    /// `priced_total` is the grand total computed at cart-update time and
    /// must equal `cart.total_amount + tax + shipping` — the caller passes
    /// tax and shipping separately so the invariant is checked here rather
    /// than trusted.
    ///
    /// # Errors
    ///
    /// [`MandateError::CartNotSigned`] unless the cart is `Signed`,
    /// [`MandateError::Expired`] past the cart's staleness window,
    /// [`MandateError::TotalMismatch`] if the stated total diverges from
    /// `cart.total_amount + tax + shipping`.
    pub fn for_cart(
        cart: &CartMandate,
        priced_total: Amount,
        tax: Amount,
        shipping: Amount,
        payment_token: impl Into<String>,
        requires_otp: bool,
        now: UnixTimestamp,
    ) -> Result<Self, MandateError> {
        if cart.status != CartStatus::Signed {
            return Err(MandateError::CartNotSigned);
        }
        if cart.is_expired_at(now) {
            return Err(MandateError::Expired);
        }
        let expected = cart
            .total_amount
            .checked_add(tax)
            .and_then(|t| t.checked_add(shipping))
            .ok_or(MandateError::AmountOverflow)?;
        if expected != priced_total {
            return Err(MandateError::TotalMismatch {
                expected,
                actual: priced_total,
            });
        }
        Ok(Self {
            payment_mandate_id: Uuid::new_v4(),
            cart_mandate_id: cart.cart_mandate_id,
            merchant_id: cart.merchant_id.clone(),
            total_amount: priced_total,
            payment_token: payment_token.into(),
            user_signature: None,
            requires_otp,
            status: PaymentMandateStatus::Created,
            created_at: now,
        })
    }

    /// Signs the mandate on the user's device.
    ///
    /// Idempotent: a second call on an already-signed mandate returns a clone
    /// of the prior signature and changes nothing — callers replaying a
    /// signing request get the committed result, not a fresh signature.
    pub fn sign_on_device(&mut self, device_id: &str) -> UserDeviceSignature {
        if let Some(existing) = &self.user_signature {
            return existing.clone();
        }
        let signature = UserDeviceSignature {
            signature_id: Uuid::new_v4(),
            payment_mandate_id: self.payment_mandate_id,
            signature: SignatureToken::over(&[
                &self.payment_mandate_id.to_string(),
                &self.total_amount.to_string(),
                device_id,
            ]),
            signed_at: UnixTimestamp::now(),
            device_id: device_id.to_owned(),
        };
        self.user_signature = Some(signature.clone());
        self.status = PaymentMandateStatus::UserSigned;
        signature
    }

    /// Marks the mandate transmitted to the credentials provider.
    ///
    /// # Errors
    ///
    /// [`MandateError::CartNotSigned`] if the user signature is missing.
    pub fn mark_transmitted(&mut self) -> Result<(), MandateError> {
        if self.user_signature.is_none() {
            return Err(MandateError::CartNotSigned);
        }
        self.status = PaymentMandateStatus::Transmitted;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mandate::cart::{CartItem, FulfillmentTerms};

    fn signed_cart() -> CartMandate {
        let mut cart = CartMandate::draft(
            Uuid::new_v4(),
            vec![CartItem {
                item_id: "laptop_002".into(),
                quantity: 1,
                unit_price: "1129.50".parse().unwrap(),
            }],
            3600,
        )
        .unwrap();
        cart.mark_validated().unwrap();
        cart.attach_merchant_signature(
            "tech_store_merchant",
            SignatureToken::over(&["sig"]),
            FulfillmentTerms {
                fulfillment_sla: "2-3 business days".into(),
                return_policy: "30 days".into(),
                warranty: "1 year".into(),
            },
            UnixTimestamp::now(),
        )
        .unwrap();
        cart
    }

    fn amounts() -> (Amount, Amount, Amount) {
        (
            "1133.00".parse().unwrap(),
            "1.50".parse().unwrap(),
            "2.00".parse().unwrap(),
        )
    }

    #[test]
    fn test_for_cart_happy_path() {
        let cart = signed_cart();
        let (total, tax, shipping) = amounts();
        let mandate = PaymentMandate::for_cart(
            &cart,
            total,
            tax,
            shipping,
            "cred_token_abc",
            true,
            UnixTimestamp::now(),
        )
        .unwrap();
        assert_eq!(mandate.total_amount.to_string(), "1133.00");
        assert_eq!(mandate.status, PaymentMandateStatus::Created);
        assert!(mandate.requires_otp);
    }

    #[test]
    fn test_for_cart_rejects_unsigned_cart() {
        let cart = CartMandate::draft(Uuid::new_v4(), vec![], 3600).unwrap();
        let (total, tax, shipping) = amounts();
        let err = PaymentMandate::for_cart(
            &cart,
            total,
            tax,
            shipping,
            "tok",
            true,
            UnixTimestamp::now(),
        )
        .unwrap_err();
        assert_eq!(err, MandateError::CartNotSigned);
    }

    #[test]
    fn test_for_cart_rejects_expired_cart() {
        let mut cart = signed_cart();
        cart.expires_at = UnixTimestamp::from_secs(0);
        let (total, tax, shipping) = amounts();
        let err = PaymentMandate::for_cart(
            &cart,
            total,
            tax,
            shipping,
            "tok",
            true,
            UnixTimestamp::now(),
        )
        .unwrap_err();
        assert_eq!(err, MandateError::Expired);
    }

    #[test]
    fn test_for_cart_rejects_total_mismatch() {
        let cart = signed_cart();
        let (_, tax, shipping) = amounts();
        let err = PaymentMandate::for_cart(
            &cart,
            "9999.00".parse().unwrap(),
            tax,
            shipping,
            "tok",
            true,
            UnixTimestamp::now(),
        )
        .unwrap_err();
        assert!(matches!(err, MandateError::TotalMismatch { .. }));
    }

    #[test]
    fn test_device_signing_is_idempotent() {
        let cart = signed_cart();
        let (total, tax, shipping) = amounts();
        let mut mandate = PaymentMandate::for_cart(
            &cart,
            total,
            tax,
            shipping,
            "tok",
            true,
            UnixTimestamp::now(),
        )
        .unwrap();

        let first = mandate.sign_on_device("user_device_001");
        let second = mandate.sign_on_device("user_device_001");
        assert_eq!(first, second);
        assert_eq!(first.signature_id, second.signature_id);
        assert_eq!(mandate.status, PaymentMandateStatus::UserSigned);
    }

    #[test]
    fn test_transmit_requires_user_signature() {
        let cart = signed_cart();
        let (total, tax, shipping) = amounts();
        let mut mandate = PaymentMandate::for_cart(
            &cart,
            total,
            tax,
            shipping,
            "tok",
            true,
            UnixTimestamp::now(),
        )
        .unwrap();
        assert!(mandate.mark_transmitted().is_err());
        mandate.sign_on_device("user_device_001");
        mandate.mark_transmitted().unwrap();
        assert_eq!(mandate.status, PaymentMandateStatus::Transmitted);
    }
}
