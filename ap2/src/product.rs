//! Merchant catalog records.

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::timestamp::UnixTimestamp;

/// A product as listed in a merchant's catalog.
///
/// Stock is the merchant's available-to-sell count; reservations decrement it
/// and releases restore it. A price carries an expiry after which the listing
/// must be re-fetched rather than trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Stable product identifier (e.g. `"laptop_002"`).
    pub id: String,

    /// Display name.
    pub name: String,

    /// Unit price in the settlement currency.
    pub price: Amount,

    /// Category slug (e.g. `"electronics"`).
    pub category: String,

    /// Free-form description used for query matching.
    #[serde(default)]
    pub description: String,

    /// Available-to-sell stock count.
    pub stock: u32,

    /// Merchant display name that lists this product.
    pub merchant: String,

    /// When the quoted price expires.
    pub expires: UnixTimestamp,

    /// Refund window in days after capture.
    pub refund_period: u32,
}
