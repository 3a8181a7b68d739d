//! Intent mandates: the root of the chain.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MandateError;
use crate::signature::SignatureToken;
use crate::timestamp::UnixTimestamp;

/// Which merchants an intent mandate allows to fulfill the purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MerchantFilter {
    /// Any merchant may fulfill.
    Any,
    /// Only the listed merchant identifiers may fulfill.
    Only(Vec<String>),
}

impl MerchantFilter {
    /// Whether the filter admits the given merchant.
    #[must_use]
    pub fn allows(&self, merchant_id: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Only(ids) => ids.iter().any(|id| id == merchant_id),
        }
    }
}

/// Lifecycle of an intent mandate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Signed and usable.
    Created,
    /// A payment mandate derived from this intent reached capture.
    Consumed,
    /// The expiry passed before the chain completed.
    Expired,
}

/// The user's signed authorization for a human-not-present purchase.
///
/// Immutable once signed; the only state changes are the terminal
/// [`IntentStatus::Consumed`] and [`IntentStatus::Expired`] marks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMandate {
    /// Unique mandate identifier.
    pub mandate_id: Uuid,
    /// The authorizing user.
    pub user_id: String,
    /// Natural-language description of what may be bought.
    pub item_description: String,
    /// Merchants allowed to fulfill the purchase.
    pub allowed_merchants: MerchantFilter,
    /// Whether the user must confirm before money moves.
    pub user_confirmation_required: bool,
    /// Whether purchases under this mandate are refundable.
    pub refundable: bool,
    /// Creation time.
    pub created_at: UnixTimestamp,
    /// Expiry deadline; terminal once passed.
    pub expires_at: UnixTimestamp,
    /// The user's signature over `(user_id, item_description, mandate_id)`.
    pub user_signature: SignatureToken,
    /// Current lifecycle state.
    pub status: IntentStatus,
}

impl IntentMandate {
    /// Creates and signs a new intent mandate valid for `ttl_secs` seconds.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        item_description: impl Into<String>,
        allowed_merchants: MerchantFilter,
        ttl_secs: u64,
    ) -> Self {
        let user_id = user_id.into();
        let item_description = item_description.into();
        let mandate_id = Uuid::new_v4();
        let now = UnixTimestamp::now();
        let user_signature =
            SignatureToken::over(&[&user_id, &item_description, &mandate_id.to_string()]);
        Self {
            mandate_id,
            user_id,
            item_description,
            allowed_merchants,
            user_confirmation_required: true,
            refundable: true,
            created_at: now,
            expires_at: now + ttl_secs,
            user_signature,
            status: IntentStatus::Created,
        }
    }

    /// Verifies the user signature against the mandate's own fields.
    #[must_use]
    pub fn verify_signature(&self) -> bool {
        self.user_signature.verify_over(&[
            &self.user_id,
            &self.item_description,
            &self.mandate_id.to_string(),
        ])
    }

    /// Whether the mandate has expired as of `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: UnixTimestamp) -> bool {
        self.status == IntentStatus::Expired || self.expires_at.is_expired_at(now)
    }

    /// Checks the mandate is live and admits `merchant_id`.
    ///
    /// # Errors
    ///
    /// [`MandateError::Expired`] past the deadline,
    /// [`MandateError::MerchantNotAllowed`] if the filter rejects the merchant.
    pub fn check_usable(&self, merchant_id: &str, now: UnixTimestamp) -> Result<(), MandateError> {
        if self.is_expired_at(now) || self.status == IntentStatus::Consumed {
            return Err(MandateError::Expired);
        }
        if !self.allowed_merchants.allows(merchant_id) {
            return Err(MandateError::MerchantNotAllowed {
                merchant_id: merchant_id.to_owned(),
            });
        }
        Ok(())
    }

    /// Marks the mandate consumed after a successful capture. Terminal.
    pub fn consume(&mut self) {
        self.status = IntentStatus::Consumed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_mandate_is_signed_and_live() {
        let mandate = IntentMandate::new("user_7", "laptop", MerchantFilter::Any, 3600);
        assert_eq!(mandate.status, IntentStatus::Created);
        assert!(mandate.verify_signature());
        assert!(!mandate.is_expired_at(UnixTimestamp::now()));
    }

    #[test]
    fn test_signature_detects_tamper() {
        let mut mandate = IntentMandate::new("user_7", "laptop", MerchantFilter::Any, 3600);
        mandate.item_description = "yacht".into();
        assert!(!mandate.verify_signature());
    }

    #[test]
    fn test_merchant_filter() {
        let filter = MerchantFilter::Only(vec!["tech_store_merchant".into()]);
        assert!(filter.allows("tech_store_merchant"));
        assert!(!filter.allows("generic_merchant"));
        assert!(MerchantFilter::Any.allows("anyone"));
    }

    #[test]
    fn test_check_usable_rejects_expired() {
        let mandate = IntentMandate::new("user_7", "laptop", MerchantFilter::Any, 10);
        let later = mandate.expires_at + 1;
        assert_eq!(
            mandate.check_usable("m", later),
            Err(MandateError::Expired)
        );
    }

    #[test]
    fn test_check_usable_rejects_consumed() {
        let mut mandate = IntentMandate::new("user_7", "laptop", MerchantFilter::Any, 3600);
        mandate.consume();
        assert_eq!(
            mandate.check_usable("m", UnixTimestamp::now()),
            Err(MandateError::Expired)
        );
    }

    #[test]
    fn test_check_usable_rejects_filtered_merchant() {
        let mandate = IntentMandate::new(
            "user_7",
            "laptop",
            MerchantFilter::Only(vec!["tech_store_merchant".into()]),
            3600,
        );
        let err = mandate
            .check_usable("generic_merchant", UnixTimestamp::now())
            .unwrap_err();
        assert!(matches!(err, MandateError::MerchantNotAllowed { .. }));
    }
}
