//! The merchant service facade and A2A dispatch.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use ap2::envelope::{AgentTransfer, CartMandatePayload, Envelope, Payload, ProductCatalogPayload};
use ap2::error::Failure;
use ap2::mandate::{
    CartIssue, CartIssueReason, CartItem, CartMandate, CartStatus, CartValidation, Fulfillment,
    FulfillmentTerms,
};
use ap2::payment::{Capture, CaptureStatus};
use ap2::signature::SignatureToken;
use ap2::timestamp::{SECS_PER_DAY, UnixTimestamp};

use crate::catalog::ProductCatalog;
use crate::error::MerchantError;
use crate::inventory::Inventory;

/// Capabilities this agent announces on A2A handshakes.
const CAPABILITIES: &[&str] = &[
    "product_search",
    "inventory_management",
    "cart_signing",
    "order_fulfillment",
];

/// Default inventory hold while a signed cart works through checkout.
const DEFAULT_HOLD_SECS: u64 = SECS_PER_DAY;

/// The merchant agent: catalog reads, cart validation and signing, inventory
/// holds, and order fulfillment.
///
/// All state mutation on one entity (a cart, a product's stock count) is
/// serialized through per-entity locking; catalog and reservation reads are
/// snapshots.
pub struct MerchantService {
    merchant_id: String,
    catalog: Arc<dyn ProductCatalog>,
    inventory: Inventory,
    hold_secs: u64,
    /// Signed-cart ledger: the committed result each re-sign replays.
    signed: DashMap<Uuid, CartMandate>,
    fulfillments: DashMap<Uuid, Fulfillment>,
}

impl std::fmt::Debug for MerchantService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantService")
            .field("merchant_id", &self.merchant_id)
            .field("signed_carts", &self.signed.len())
            .finish()
    }
}

impl MerchantService {
    /// Creates a merchant over an injected catalog, seeding the stock pool
    /// from the catalog's listed counts.
    #[must_use]
    pub fn new(merchant_id: impl Into<String>, catalog: Arc<dyn ProductCatalog>) -> Self {
        let inventory = Inventory::from_catalog(catalog.as_ref());
        Self {
            merchant_id: merchant_id.into(),
            catalog,
            inventory,
            hold_secs: DEFAULT_HOLD_SECS,
            signed: DashMap::new(),
            fulfillments: DashMap::new(),
        }
    }

    /// Overrides the inventory hold duration for signed carts.
    #[must_use]
    pub fn with_hold_secs(mut self, hold_secs: u64) -> Self {
        self.hold_secs = hold_secs;
        self
    }

    /// This merchant's identifier.
    #[must_use]
    pub fn merchant_id(&self) -> &str {
        &self.merchant_id
    }

    /// The stock pool, exposed for fulfillment checks and tests.
    #[must_use]
    pub const fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Catalog browse: a lock-free snapshot read.
    #[must_use]
    pub fn browse(&self, query: &str, category: Option<&str>, max_results: usize) -> ProductCatalogPayload {
        let products = self.catalog.search(query, category, max_results);
        ProductCatalogPayload {
            query: Some(query.to_owned()),
            category: category.map(str::to_owned),
            max_results: Some(max_results),
            total_products: self.catalog.len(),
            products,
        }
    }

    /// Validates cart items against live stock and listed pricing.
    ///
    /// Per-item failures aggregate into the returned [`CartValidation`]; the
    /// computed total is the sum of `unit_price × quantity` over valid lines,
    /// reported only when every line passes.
    #[must_use]
    pub fn validate_cart(&self, items: &[CartItem]) -> CartValidation {
        let mut issues = Vec::new();
        for item in items {
            let Some(product) = self.catalog.product(&item.item_id) else {
                issues.push(CartIssue {
                    item_id: item.item_id.clone(),
                    reason: CartIssueReason::ProductNotFound,
                });
                continue;
            };
            let available = self.inventory.available(&item.item_id).unwrap_or(0);
            if available < item.quantity {
                issues.push(CartIssue {
                    item_id: item.item_id.clone(),
                    reason: CartIssueReason::InsufficientStock {
                        available,
                        requested: item.quantity,
                    },
                });
                continue;
            }
            if product.price != item.unit_price {
                issues.push(CartIssue {
                    item_id: item.item_id.clone(),
                    reason: CartIssueReason::PriceChanged {
                        current: product.price,
                    },
                });
            }
        }
        if issues.is_empty() {
            match CartMandate::items_total(items) {
                Ok(total) => CartValidation::passed(total),
                Err(_) => CartValidation::failed(Vec::new()),
            }
        } else {
            CartValidation::failed(issues)
        }
    }

    /// Validates and countersigns a draft cart, then holds its inventory.
    ///
    /// Signing is one-way and idempotent: a cart already in the signed ledger
    /// comes back verbatim — same signature, same `merchant_signed_at` — and
    /// is never re-validated against live inventory inside its staleness
    /// window. The signature is computed over
    /// `(merchant_id, total_amount, cart_mandate_id, signing_date)`.
    ///
    /// # Errors
    ///
    /// [`MerchantError::CartExpired`] past the cart's window,
    /// [`MerchantError::InvalidCart`] when validation fails, plus any
    /// mandate-transition rejection.
    pub async fn sign_cart(&self, mut cart: CartMandate) -> Result<(CartMandate, CartValidation), MerchantError> {
        if let Some(existing) = self.signed.get(&cart.cart_mandate_id) {
            let validation = CartValidation::passed(existing.total_amount);
            return Ok((existing.clone(), validation));
        }

        let now = UnixTimestamp::now();
        if cart.is_expired_at(now) {
            return Err(MerchantError::CartExpired);
        }
        let validation = self.validate_cart(&cart.items);
        if !validation.valid {
            // A shortage-only failure is retryable — stock may free up when
            // another hold lapses. Anything else refuses the cart outright.
            let first_shortage = validation.issues.iter().find_map(|issue| match issue.reason {
                CartIssueReason::InsufficientStock {
                    available,
                    requested,
                } => Some((issue.item_id.clone(), available, requested)),
                _ => None,
            });
            let all_shortages = validation
                .issues
                .iter()
                .all(|i| matches!(i.reason, CartIssueReason::InsufficientStock { .. }));
            if let Some((item_id, available, requested)) = first_shortage {
                if all_shortages {
                    return Err(MerchantError::InsufficientStock {
                        item_id,
                        available,
                        requested,
                    });
                }
            }
            return Err(MerchantError::InvalidCart { validation });
        }

        cart.mark_validated()?;
        let signature = SignatureToken::over(&[
            &self.merchant_id,
            &cart.total_amount.to_string(),
            &cart.cart_mandate_id.to_string(),
            &now.as_days().to_string(),
        ]);
        cart.attach_merchant_signature(&self.merchant_id, signature, self.terms(), now)?;
        cart.verify_total()?;

        self.inventory
            .reserve(cart.cart_mandate_id, &cart.items, self.hold_secs)
            .await?;

        // First writer wins; a racing duplicate replays the committed cart.
        let committed = self
            .signed
            .entry(cart.cart_mandate_id)
            .or_insert(cart)
            .clone();
        tracing::info!(
            cart_mandate_id = %committed.cart_mandate_id,
            total = %committed.total_amount,
            "cart mandate signed"
        );
        Ok((committed, validation))
    }

    /// Fulfills a signed cart after its payment captured.
    ///
    /// Consumes the inventory hold, marks the ledger cart fulfilled, and
    /// returns the shipment record. Idempotent per cart.
    ///
    /// # Errors
    ///
    /// [`MerchantError::CartNotSigned`] for carts outside the signed ledger,
    /// [`MerchantError::CaptureIncomplete`] unless the capture completed,
    /// [`MerchantError::ReservationExpired`] if the hold lapsed first.
    pub fn fulfill(&self, cart_mandate_id: Uuid, capture: &Capture) -> Result<Fulfillment, MerchantError> {
        if let Some(existing) = self.fulfillments.get(&cart_mandate_id) {
            return Ok(existing.clone());
        }
        let mut entry = self
            .signed
            .get_mut(&cart_mandate_id)
            .ok_or(MerchantError::CartNotSigned)?;
        if capture.status != CaptureStatus::Completed {
            return Err(MerchantError::CaptureIncomplete);
        }
        self.inventory.consume(&cart_mandate_id)?;
        entry.mark_fulfilled()?;
        drop(entry);

        let now = UnixTimestamp::now();
        let fulfillment = Fulfillment {
            fulfillment_id: Uuid::new_v4(),
            cart_mandate_id,
            merchant_id: self.merchant_id.clone(),
            tracking_number: tracking_number(),
            shipping_method: "standard_shipping".to_owned(),
            created_at: now,
            estimated_shipping: now + 2 * SECS_PER_DAY,
        };
        self.fulfillments
            .insert(cart_mandate_id, fulfillment.clone());
        tracing::info!(
            %cart_mandate_id,
            tracking = %fulfillment.tracking_number,
            "order fulfillment initiated"
        );
        Ok(fulfillment)
    }

    /// A2A ingress: dispatches a request envelope and always answers with a
    /// well-formed response envelope — failures travel inside the payload,
    /// never as transport faults.
    pub async fn handle(&self, envelope: Envelope) -> Envelope {
        let response = match &envelope.payload {
            Payload::AgentTransfer(transfer) => Payload::AgentTransfer(AgentTransfer::handshake(
                format!("ack: {}", transfer.transfer_reason),
                CAPABILITIES.iter().map(|&c| c.to_owned()).collect(),
            )),
            Payload::ProductCatalog(request) => Payload::ProductCatalog(self.browse(
                request.query.as_deref().unwrap_or(""),
                request.category.as_deref(),
                request.max_results.unwrap_or(10),
            )),
            Payload::CartMandate(request) => self.handle_cart(request).await,
            other => Payload::CartMandate(CartMandatePayload::rejected(
                MerchantError::UnsupportedAction(other.action()).to_info(),
                None,
            )),
        };
        envelope.reply(response)
    }

    async fn handle_cart(&self, request: &CartMandatePayload) -> Payload {
        // Fulfillment request: signed cart + completed capture.
        if let (Some(cart), Some(capture)) = (&request.cart, &request.capture) {
            return match self.fulfill(cart.cart_mandate_id, capture) {
                Ok(fulfillment) => Payload::CartMandate(CartMandatePayload::fulfilled(fulfillment)),
                Err(err) => {
                    Payload::CartMandate(CartMandatePayload::rejected(err.to_info(), None))
                }
            };
        }
        // Signing request: a draft cart.
        match &request.cart {
            Some(cart) if cart.status == CartStatus::Draft => {
                match self.sign_cart(cart.clone()).await {
                    Ok((signed, validation)) => {
                        Payload::CartMandate(CartMandatePayload::signed(signed, validation))
                    }
                    Err(MerchantError::InvalidCart { validation }) => {
                        let info = MerchantError::InvalidCart {
                            validation: validation.clone(),
                        }
                        .to_info();
                        Payload::CartMandate(CartMandatePayload::rejected(info, Some(validation)))
                    }
                    Err(err) => {
                        Payload::CartMandate(CartMandatePayload::rejected(err.to_info(), None))
                    }
                }
            }
            _ => Payload::CartMandate(CartMandatePayload::rejected(
                MerchantError::UnsupportedAction("cart_mandate").to_info(),
                None,
            )),
        }
    }

    fn terms(&self) -> FulfillmentTerms {
        FulfillmentTerms {
            fulfillment_sla: "2-3 business days".to_owned(),
            return_policy: "30 days".to_owned(),
            warranty: "1 year manufacturer warranty".to_owned(),
        }
    }
}

/// Carrier tracking numbers: `TRACK` plus eight uppercase hex characters.
fn tracking_number() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("TRACK{}", hex[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::demo_catalog;
    use ap2::envelope::AgentId;
    use ap2::payment::{Authorization, AuthorizationStatus};

    fn service() -> MerchantService {
        MerchantService::new("tech_store_merchant", Arc::new(demo_catalog()))
    }

    fn laptop_cart() -> CartMandate {
        CartMandate::draft(
            Uuid::new_v4(),
            vec![CartItem {
                item_id: "laptop_002".into(),
                quantity: 1,
                unit_price: "1129.50".parse().unwrap(),
            }],
            3600,
        )
        .unwrap()
    }

    fn completed_capture() -> Capture {
        let authorization = Authorization {
            authorization_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            amount: "1133.00".parse().unwrap(),
            currency: "USD".into(),
            status: AuthorizationStatus::Authorized,
            authorization_code: "AUTH0000".into(),
            network_transaction_id: "ntxn_test".into(),
            risk_score: 15,
            authorized_at: UnixTimestamp::now(),
            expires_at: UnixTimestamp::now_plus(86_400),
            otp_sent_to: None,
            otp_expires_at: None,
        };
        Capture::completed(&authorization, UnixTimestamp::now())
    }

    #[test]
    fn test_browse_filters_and_reports_totals() {
        let payload = service().browse("laptop", None, 10);
        assert_eq!(payload.products.len(), 3);
        assert_eq!(payload.total_products, 5);
    }

    #[test]
    fn test_validate_cart_totals_match_line_items() {
        let validation = service().validate_cart(&[
            CartItem {
                item_id: "laptop_002".into(),
                quantity: 2,
                unit_price: "1129.50".parse().unwrap(),
            },
            CartItem {
                item_id: "phone_001".into(),
                quantity: 1,
                unit_price: "999.99".parse().unwrap(),
            },
        ]);
        assert!(validation.valid);
        assert_eq!(validation.total_amount.to_string(), "3258.99");
    }

    #[test]
    fn test_validate_cart_reports_each_failure() {
        let validation = service().validate_cart(&[
            CartItem {
                item_id: "ghost_001".into(),
                quantity: 1,
                unit_price: "1.00".parse().unwrap(),
            },
            CartItem {
                item_id: "tablet_001".into(),
                quantity: 50,
                unit_price: "649.99".parse().unwrap(),
            },
        ]);
        assert!(!validation.valid);
        assert_eq!(validation.issues.len(), 2);
        assert!(matches!(
            validation.issues[0].reason,
            CartIssueReason::ProductNotFound
        ));
        assert!(matches!(
            validation.issues[1].reason,
            CartIssueReason::InsufficientStock {
                available: 20,
                requested: 50
            }
        ));
    }

    #[test]
    fn test_validate_cart_detects_price_drift() {
        let validation = service().validate_cart(&[CartItem {
            item_id: "laptop_002".into(),
            quantity: 1,
            unit_price: "999.00".parse().unwrap(),
        }]);
        assert!(!validation.valid);
        assert!(matches!(
            validation.issues[0].reason,
            CartIssueReason::PriceChanged { .. }
        ));
    }

    #[tokio::test]
    async fn test_sign_cart_attaches_signature_and_reserves() {
        let service = service();
        let (signed, validation) = service.sign_cart(laptop_cart()).await.unwrap();
        assert_eq!(signed.status, CartStatus::Signed);
        assert!(validation.valid);
        assert_eq!(signed.merchant_id.as_deref(), Some("tech_store_merchant"));
        assert!(signed.merchant_signature.is_some());
        signed.verify_total().unwrap();
        // Signing held one unit.
        assert_eq!(service.inventory().available("laptop_002"), Some(24));
    }

    #[tokio::test]
    async fn test_sign_cart_is_idempotent() {
        let service = service();
        let cart = laptop_cart();
        let (first, _) = service.sign_cart(cart.clone()).await.unwrap();
        let (second, _) = service.sign_cart(cart).await.unwrap();
        assert_eq!(first.merchant_signature, second.merchant_signature);
        assert_eq!(first.merchant_signed_at, second.merchant_signed_at);
        // The replay did not double-reserve.
        assert_eq!(service.inventory().available("laptop_002"), Some(24));
    }

    #[tokio::test]
    async fn test_sign_cart_shortage_is_retryable() {
        let service = service();
        let cart = CartMandate::draft(
            Uuid::new_v4(),
            vec![CartItem {
                item_id: "laptop_002".into(),
                quantity: 9_999,
                unit_price: "1129.50".parse().unwrap(),
            }],
            3600,
        )
        .unwrap();
        let err = service.sign_cart(cart).await.unwrap_err();
        assert!(matches!(
            err,
            MerchantError::InsufficientStock {
                available: 25,
                requested: 9_999,
                ..
            }
        ));
        assert_eq!(service.inventory().available("laptop_002"), Some(25));
    }

    #[tokio::test]
    async fn test_sign_cart_refuses_invalid_cart() {
        let service = service();
        let cart = CartMandate::draft(
            Uuid::new_v4(),
            vec![CartItem {
                item_id: "ghost_001".into(),
                quantity: 1,
                unit_price: "1.00".parse().unwrap(),
            }],
            3600,
        )
        .unwrap();
        let err = service.sign_cart(cart).await.unwrap_err();
        assert!(matches!(err, MerchantError::InvalidCart { .. }));
    }

    #[tokio::test]
    async fn test_sign_cart_refuses_expired_cart() {
        let service = service();
        let mut cart = laptop_cart();
        cart.expires_at = UnixTimestamp::from_secs(0);
        let err = service.sign_cart(cart).await.unwrap_err();
        assert!(matches!(err, MerchantError::CartExpired));
    }

    #[tokio::test]
    async fn test_fulfill_consumes_hold_and_is_idempotent() {
        let service = service();
        let (signed, _) = service.sign_cart(laptop_cart()).await.unwrap();
        let capture = completed_capture();
        let first = service.fulfill(signed.cart_mandate_id, &capture).unwrap();
        let second = service.fulfill(signed.cart_mandate_id, &capture).unwrap();
        assert_eq!(first.fulfillment_id, second.fulfillment_id);
        assert!(first.tracking_number.starts_with("TRACK"));
        assert_eq!(first.tracking_number.len(), 13);
        // Consumed stock never returns to the pool.
        assert_eq!(service.inventory().available("laptop_002"), Some(24));
    }

    #[tokio::test]
    async fn test_fulfill_requires_signed_cart() {
        let service = service();
        let err = service
            .fulfill(Uuid::new_v4(), &completed_capture())
            .unwrap_err();
        assert!(matches!(err, MerchantError::CartNotSigned));
    }

    #[tokio::test]
    async fn test_handle_signs_draft_cart() {
        let service = service();
        let request = Envelope::send(
            AgentId::ShoppingAgent,
            AgentId::MerchantAgent,
            Payload::CartMandate(CartMandatePayload::cart(laptop_cart())),
            None,
        );
        let response = service.handle(request.clone()).await;
        assert_eq!(response.in_response_to, Some(request.message_id));
        assert_eq!(response.sender_agent, AgentId::MerchantAgent);
        match response.payload {
            Payload::CartMandate(payload) => {
                assert!(payload.failure.is_none());
                assert_eq!(payload.cart.unwrap().status, CartStatus::Signed);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handle_rejects_unsupported_action() {
        let service = service();
        let request = Envelope::send(
            AgentId::ShoppingAgent,
            AgentId::MerchantAgent,
            Payload::RefundResult(ap2::payment::RefundResult::rejected(
                ap2::error::FailureInfo::new("x", ap2::error::FailureClass::Malformed, "x"),
            )),
            None,
        );
        let response = service.handle(request).await;
        match response.payload {
            Payload::CartMandate(payload) => {
                let failure = payload.failure.unwrap();
                assert_eq!(failure.error_code, "unsupported_action");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
