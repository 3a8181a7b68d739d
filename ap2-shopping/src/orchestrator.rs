//! The shopping orchestrator and its protocol operations.
//!
//! One [`Purchase`] record tracks each mandate chain. Operations check the
//! state they require, exchange at most one envelope with the relevant peer,
//! and advance the state only after the peer's response validates. In-flight
//! operations never hold a purchase lock across an exchange: state is
//! re-checked when the response lands, so a concurrent abandon (or any stale
//! continuation) loses cleanly with a precondition error instead of
//! corrupting the chain.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use ap2::amount::Amount;
use ap2::directory::{Address, CredentialToken, PaymentMethod, effective_default};
use ap2::envelope::{
    AgentId, AgentTransfer, CartMandatePayload, DirectoryQuery, DirectoryResult, Envelope, Payload,
    ProductCatalogPayload,
};
use ap2::error::{FailureClass, FailureInfo};
use ap2::mandate::{
    CartItem, CartMandate, Fulfillment, IntentMandate, MandateError, MerchantFilter,
    PaymentMandate, UserDeviceSignature,
};
use ap2::payment::{
    Authorization, AuthorizationResult, AuthorizationStatus, Capture, OtpAttempt, PaymentSession,
    SessionResult,
};
use ap2::product::Product;
use ap2::timestamp::UnixTimestamp;

use crate::error::ShoppingError;
use crate::peer::{CredentialsPeer, MerchantPeer};
use crate::state::PurchaseState;

/// Cart staleness window granted at selection time.
const CART_TTL_SECS: u64 = 24 * 3600;

/// Tax and shipping recorded at cart-update time, and the grand total they
/// produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartPricing {
    /// Tax recorded for the order.
    pub tax: Amount,
    /// Shipping cost recorded for the order.
    pub shipping: Amount,
    /// `cart.total_amount + tax + shipping`.
    pub grand_total: Amount,
}

/// Everything the orchestrator holds about one purchase.
#[derive(Debug, Clone)]
pub struct Purchase {
    /// Current state-machine position.
    pub state: PurchaseState,
    /// The root intent mandate.
    pub intent: IntentMandate,
    /// Products the merchant returned.
    pub products: Vec<Product>,
    /// The cart mandate, draft through signed.
    pub cart: Option<CartMandate>,
    /// Shipping address chosen for the order.
    pub shipping_address: Option<Address>,
    /// Pricing recorded at cart-update time.
    pub pricing: Option<CartPricing>,
    /// Payment methods the provider returned.
    pub payment_methods: Vec<PaymentMethod>,
    /// The credential token backing the payment.
    pub token: Option<CredentialToken>,
    /// The derived payment mandate.
    pub payment_mandate: Option<PaymentMandate>,
    /// The provider's payment session.
    pub session: Option<PaymentSession>,
    /// The provider's authorization.
    pub authorization: Option<Authorization>,
    /// The completed capture.
    pub capture: Option<Capture>,
    /// The merchant's fulfillment record.
    pub fulfillment: Option<Fulfillment>,
}

impl Purchase {
    fn new(intent: IntentMandate) -> Self {
        Self {
            state: PurchaseState::IntentCreated,
            intent,
            products: Vec::new(),
            cart: None,
            shipping_address: None,
            pricing: None,
            payment_methods: Vec::new(),
            token: None,
            payment_mandate: None,
            session: None,
            authorization: None,
            capture: None,
            fulfillment: None,
        }
    }
}

/// Drives end-to-end purchases against a merchant peer and a credentials
/// provider peer.
pub struct ShoppingOrchestrator {
    merchant: Arc<dyn MerchantPeer>,
    credentials: Arc<dyn CredentialsPeer>,
    purchases: DashMap<Uuid, Purchase>,
    /// Correlation log: every message id this agent has sent or received.
    observed: DashSet<Uuid>,
    device_id: String,
}

impl std::fmt::Debug for ShoppingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShoppingOrchestrator")
            .field("purchases", &self.purchases.len())
            .finish()
    }
}

impl ShoppingOrchestrator {
    /// Creates an orchestrator over the two peers.
    #[must_use]
    pub fn new(merchant: Arc<dyn MerchantPeer>, credentials: Arc<dyn CredentialsPeer>) -> Self {
        Self {
            merchant,
            credentials,
            purchases: DashMap::new(),
            observed: DashSet::new(),
            device_id: "user_device_001".to_owned(),
        }
    }

    /// Snapshot of one purchase.
    #[must_use]
    pub fn purchase(&self, purchase_id: &Uuid) -> Option<Purchase> {
        self.purchases.get(purchase_id).map(|p| p.clone())
    }

    /// Creates the intent mandate that roots a new purchase.
    ///
    /// A user action; no envelope leaves the agent. Returns the purchase id
    /// (the intent mandate's id).
    pub fn create_intent(
        &self,
        user_id: impl Into<String>,
        item_description: impl Into<String>,
        allowed_merchants: MerchantFilter,
        ttl_secs: u64,
    ) -> Uuid {
        let intent = IntentMandate::new(user_id, item_description, allowed_merchants, ttl_secs);
        let purchase_id = intent.mandate_id;
        tracing::info!(%purchase_id, "intent mandate created");
        self.purchases.insert(purchase_id, Purchase::new(intent));
        purchase_id
    }

    /// Searches the merchant's catalog: `IntentCreated → ProductsFound`.
    ///
    /// # Errors
    ///
    /// [`ShoppingError::NoProductsFound`] (transient, state unchanged) when
    /// nothing matches, plus the usual state and peer failures.
    pub async fn find_products(
        &self,
        purchase_id: Uuid,
        query: &str,
    ) -> Result<Vec<Product>, ShoppingError> {
        self.expect_state(purchase_id, PurchaseState::IntentCreated)?;
        let request = self.outbound(
            AgentId::MerchantAgent,
            Payload::ProductCatalog(ProductCatalogPayload {
                query: Some(query.to_owned()),
                category: None,
                max_results: Some(10),
                ..ProductCatalogPayload::default()
            }),
        );
        let response = self.exchange_merchant(request).await?;
        let Payload::ProductCatalog(catalog) = response.payload else {
            return Err(unexpected("product_catalog", &response.payload));
        };
        if catalog.products.is_empty() {
            return Err(ShoppingError::NoProductsFound);
        }
        let products = catalog.products.clone();
        self.commit(purchase_id, PurchaseState::IntentCreated, move |p| {
            p.products = catalog.products;
            p.state = PurchaseState::ProductsFound;
        })?;
        Ok(products)
    }

    /// Selects an item and drafts the cart: `ProductsFound → CartSelected`.
    ///
    /// A user action; no envelope leaves the agent.
    ///
    /// # Errors
    ///
    /// [`ShoppingError::ProductNotOffered`] if the item is not among the
    /// found products, [`ShoppingError::Mandate`] if the intent expired or
    /// disallows the product's merchant.
    pub fn select_cart(
        &self,
        purchase_id: Uuid,
        item_id: &str,
        quantity: u32,
    ) -> Result<Uuid, ShoppingError> {
        let mut purchase = self.purchase_mut(purchase_id, PurchaseState::ProductsFound)?;
        let product = purchase
            .products
            .iter()
            .find(|p| p.id == item_id)
            .cloned()
            .ok_or_else(|| ShoppingError::ProductNotOffered(item_id.to_owned()))?;
        if let Err(err) = purchase
            .intent
            .check_usable(&product.merchant, UnixTimestamp::now())
        {
            if err == MandateError::Expired {
                purchase.state = PurchaseState::Expired;
            }
            return Err(err.into());
        }
        let cart = CartMandate::draft(
            purchase.intent.mandate_id,
            vec![CartItem {
                item_id: product.id,
                quantity,
                unit_price: product.price,
            }],
            CART_TTL_SECS,
        )?;
        let cart_mandate_id = cart.cart_mandate_id;
        purchase.cart = Some(cart);
        purchase.state = PurchaseState::CartSelected;
        tracing::info!(%purchase_id, %cart_mandate_id, "cart selected");
        Ok(cart_mandate_id)
    }

    /// Sends the draft cart for countersigning: `CartSelected → CartSigned`.
    ///
    /// # Errors
    ///
    /// A merchant `invalid_cart` rejection terminally moves the purchase to
    /// [`PurchaseState::CartInvalid`]; a stock shortage is transient and
    /// leaves the state unchanged for retry.
    pub async fn request_cart_signature(
        &self,
        purchase_id: Uuid,
    ) -> Result<CartMandate, ShoppingError> {
        let cart = {
            let purchase = self.expect_state(purchase_id, PurchaseState::CartSelected)?;
            purchase.cart.clone().ok_or(ShoppingError::ChainIncomplete("cart"))?
        };
        let request = self.outbound(
            AgentId::MerchantAgent,
            Payload::CartMandate(CartMandatePayload::cart(cart)),
        );
        let response = self.exchange_merchant(request).await?;
        let Payload::CartMandate(payload) = response.payload else {
            return Err(unexpected("cart_mandate", &response.payload));
        };
        if let Some(failure) = payload.failure {
            return Err(self.reject(purchase_id, PurchaseState::CartSelected, failure));
        }
        let signed = payload.cart.ok_or(ShoppingError::UnexpectedPayload {
            expected: "cart_mandate",
            actual: "empty cart_mandate",
        })?;
        if signed.merchant_signature.is_none() {
            return Err(MandateError::CartNotSigned.into());
        }
        signed.verify_total()?;
        let result = signed.clone();
        self.commit(purchase_id, PurchaseState::CartSelected, move |p| {
            p.cart = Some(signed);
            p.state = PurchaseState::CartSigned;
        })?;
        Ok(result)
    }

    /// Fetches the shipping address: `CartSigned → CredentialsObtained`.
    ///
    /// # Errors
    ///
    /// Peer, correlation, and state failures.
    pub async fn get_shipping_address(
        &self,
        purchase_id: Uuid,
        user_email: &str,
    ) -> Result<Address, ShoppingError> {
        self.expect_state(purchase_id, PurchaseState::CartSigned)?;
        let request = self.outbound(
            AgentId::CredentialsProvider,
            Payload::AgentTransfer(AgentTransfer::query(
                "credentials_request",
                DirectoryQuery::ShippingAddresses {
                    user_email: user_email.to_owned(),
                },
            )),
        );
        let response = self.exchange_credentials(request).await?;
        let transfer = match response.payload {
            Payload::AgentTransfer(transfer) => transfer,
            other => return Err(unexpected("agent_transfer", &other)),
        };
        if let Some(failure) = transfer.failure {
            return Err(self.reject(purchase_id, PurchaseState::CartSigned, failure));
        }
        let Some(DirectoryResult::ShippingAddresses {
            addresses,
            default_address,
        }) = transfer.result
        else {
            return Err(ShoppingError::UnexpectedPayload {
                expected: "shipping_addresses",
                actual: "agent_transfer",
            });
        };
        let chosen = default_address
            .or_else(|| addresses.into_iter().next())
            .ok_or(ShoppingError::ChainIncomplete("shipping address"))?;
        let result = chosen.clone();
        self.commit(purchase_id, PurchaseState::CartSigned, move |p| {
            p.shipping_address = Some(chosen);
            p.state = PurchaseState::CredentialsObtained;
        })?;
        Ok(result)
    }

    /// Records tax and shipping and fixes the grand total:
    /// `CredentialsObtained → CartPriced`.
    ///
    /// The signed cart is not touched — its merchant signature covers the
    /// items total, and the grand total lives beside it.
    ///
    /// # Errors
    ///
    /// [`ShoppingError::Mandate`] on amount overflow, plus state failures.
    pub fn update_cart(
        &self,
        purchase_id: Uuid,
        tax: Amount,
        shipping: Amount,
    ) -> Result<CartPricing, ShoppingError> {
        let mut purchase = self.purchase_mut(purchase_id, PurchaseState::CredentialsObtained)?;
        let cart = purchase.cart.as_ref().ok_or(ShoppingError::ChainIncomplete("cart"))?;
        let grand_total = cart
            .total_amount
            .checked_add(tax)
            .and_then(|t| t.checked_add(shipping))
            .ok_or(MandateError::AmountOverflow)?;
        let pricing = CartPricing {
            tax,
            shipping,
            grand_total,
        };
        purchase.pricing = Some(pricing.clone());
        purchase.state = PurchaseState::CartPriced;
        tracing::info!(%purchase_id, total = %grand_total, "cart priced");
        Ok(pricing)
    }

    /// Fetches eligible payment methods:
    /// `CartPriced → PaymentMethodsObtained`.
    ///
    /// # Errors
    ///
    /// Peer, correlation, and state failures.
    pub async fn get_payment_methods(
        &self,
        purchase_id: Uuid,
        user_email: &str,
        accepted_brands: Vec<String>,
    ) -> Result<Vec<PaymentMethod>, ShoppingError> {
        self.expect_state(purchase_id, PurchaseState::CartPriced)?;
        let request = self.outbound(
            AgentId::CredentialsProvider,
            Payload::AgentTransfer(AgentTransfer::query(
                "payment_methods",
                DirectoryQuery::PaymentMethods {
                    user_email: user_email.to_owned(),
                    accepted_brands,
                },
            )),
        );
        let response = self.exchange_credentials(request).await?;
        let transfer = match response.payload {
            Payload::AgentTransfer(transfer) => transfer,
            other => return Err(unexpected("agent_transfer", &other)),
        };
        if let Some(failure) = transfer.failure {
            return Err(self.reject(purchase_id, PurchaseState::CartPriced, failure));
        }
        let Some(DirectoryResult::PaymentMethods { methods, .. }) = transfer.result else {
            return Err(ShoppingError::UnexpectedPayload {
                expected: "payment_methods",
                actual: "agent_transfer",
            });
        };
        let result = methods.clone();
        self.commit(purchase_id, PurchaseState::CartPriced, move |p| {
            p.payment_methods = methods;
            p.state = PurchaseState::PaymentMethodsObtained;
        })?;
        Ok(result)
    }

    /// Obtains a credential token for the chosen (or effective-default)
    /// method: `PaymentMethodsObtained → TokenIssued`.
    ///
    /// # Errors
    ///
    /// Peer, correlation, and state failures.
    pub async fn get_credential_token(
        &self,
        purchase_id: Uuid,
        user_email: &str,
        payment_method_id: Option<&str>,
    ) -> Result<CredentialToken, ShoppingError> {
        let method_id = {
            let purchase =
                self.expect_state(purchase_id, PurchaseState::PaymentMethodsObtained)?;
            match payment_method_id {
                Some(id) => id.to_owned(),
                None => effective_default(&purchase.payment_methods, |m| m.is_default)
                    .map(|m| m.payment_method_id.clone())
                    .ok_or(ShoppingError::ChainIncomplete("payment method"))?,
            }
        };
        let request = self.outbound(
            AgentId::CredentialsProvider,
            Payload::AgentTransfer(AgentTransfer::query(
                "credential_token",
                DirectoryQuery::CredentialToken {
                    user_email: user_email.to_owned(),
                    payment_method_id: method_id,
                },
            )),
        );
        let response = self.exchange_credentials(request).await?;
        let transfer = match response.payload {
            Payload::AgentTransfer(transfer) => transfer,
            other => return Err(unexpected("agent_transfer", &other)),
        };
        if let Some(failure) = transfer.failure {
            return Err(self.reject(purchase_id, PurchaseState::PaymentMethodsObtained, failure));
        }
        let Some(DirectoryResult::CredentialToken(token)) = transfer.result else {
            return Err(ShoppingError::UnexpectedPayload {
                expected: "credential_token",
                actual: "agent_transfer",
            });
        };
        let result = token.clone();
        self.commit(purchase_id, PurchaseState::PaymentMethodsObtained, move |p| {
            p.token = Some(token);
            p.state = PurchaseState::TokenIssued;
        })?;
        Ok(result)
    }

    /// Derives the payment mandate from the signed cart and the recorded
    /// pricing: `TokenIssued → PaymentMandateCreated`.
    ///
    /// A user action; no envelope leaves the agent.
    ///
    /// # Errors
    ///
    /// [`ShoppingError::Mandate`] when the chain preconditions fail (unsigned
    /// or expired cart, total mismatch).
    pub fn create_payment_mandate(&self, purchase_id: Uuid) -> Result<PaymentMandate, ShoppingError> {
        let mut purchase = self.purchase_mut(purchase_id, PurchaseState::TokenIssued)?;
        let cart = purchase.cart.as_ref().ok_or(ShoppingError::ChainIncomplete("cart"))?;
        let pricing = purchase
            .pricing
            .as_ref()
            .ok_or(ShoppingError::ChainIncomplete("pricing"))?;
        let token = purchase.token.as_ref().ok_or(ShoppingError::ChainIncomplete("credential token"))?;
        let mandate = PaymentMandate::for_cart(
            cart,
            pricing.grand_total,
            pricing.tax,
            pricing.shipping,
            token.token.clone(),
            true,
            UnixTimestamp::now(),
        )?;
        purchase.payment_mandate = Some(mandate.clone());
        purchase.state = PurchaseState::PaymentMandateCreated;
        tracing::info!(%purchase_id, payment_mandate_id = %mandate.payment_mandate_id, "payment mandate created");
        Ok(mandate)
    }

    /// Signs the payment mandate on the user's device:
    /// `PaymentMandateCreated → UserSigned`.
    ///
    /// Idempotent: a second call with the same inputs against the committed
    /// state returns the prior signature unchanged.
    ///
    /// # Errors
    ///
    /// State failures only.
    pub fn sign_on_user_device(
        &self,
        purchase_id: Uuid,
    ) -> Result<UserDeviceSignature, ShoppingError> {
        let mut purchase = self
            .purchases
            .get_mut(&purchase_id)
            .ok_or(ShoppingError::UnknownPurchase(purchase_id))?;
        // Replay after commit: hand back the committed signature.
        if purchase.state >= PurchaseState::UserSigned && !purchase.state.is_failure() {
            if let Some(signature) = purchase
                .payment_mandate
                .as_ref()
                .and_then(|m| m.user_signature.clone())
            {
                return Ok(signature);
            }
        }
        if purchase.state != PurchaseState::PaymentMandateCreated {
            return Err(ShoppingError::WrongState {
                expected: PurchaseState::PaymentMandateCreated,
                actual: purchase.state,
            });
        }
        let device_id = self.device_id.clone();
        let mandate = purchase
            .payment_mandate
            .as_mut()
            .ok_or(ShoppingError::ChainIncomplete("payment mandate"))?;
        let signature = mandate.sign_on_device(&device_id);
        purchase.state = PurchaseState::UserSigned;
        Ok(signature)
    }

    /// Transmits the signed mandate to the credentials provider:
    /// `UserSigned → Transmitted`. The provider answers with the created
    /// payment session.
    ///
    /// # Errors
    ///
    /// Peer rejections (unknown/consumed token, unsigned mandate) and the
    /// usual state and correlation failures.
    pub async fn transmit(&self, purchase_id: Uuid) -> Result<PaymentSession, ShoppingError> {
        let mandate = {
            let mut purchase = self.purchase_mut(purchase_id, PurchaseState::UserSigned)?;
            let mandate = purchase
                .payment_mandate
                .as_mut()
                .ok_or(ShoppingError::ChainIncomplete("payment mandate"))?;
            mandate.mark_transmitted()?;
            mandate.clone()
        };
        let request = self.outbound(AgentId::CredentialsProvider, Payload::PaymentMandate(mandate));
        let response = self.exchange_credentials(request).await?;
        let Payload::PaymentSession(result) = response.payload else {
            return Err(unexpected("payment_session", &response.payload));
        };
        if let Some(failure) = result.failure {
            return Err(self.reject(purchase_id, PurchaseState::UserSigned, failure));
        }
        let session = result.session.ok_or(ShoppingError::UnexpectedPayload {
            expected: "payment_session",
            actual: "empty payment_session",
        })?;
        let result = session.clone();
        self.commit(purchase_id, PurchaseState::UserSigned, move |p| {
            p.session = Some(session);
            p.state = PurchaseState::Transmitted;
        })?;
        Ok(result)
    }

    /// Requests authorization for the transmitted session:
    /// `Transmitted → OtpPending`.
    ///
    /// A declined authorization terminally fails the purchase.
    ///
    /// # Errors
    ///
    /// Peer rejections (expired session is terminal) and state failures.
    pub async fn initiate_payment(&self, purchase_id: Uuid) -> Result<Authorization, ShoppingError> {
        let session_id = {
            let purchase = self.expect_state(purchase_id, PurchaseState::Transmitted)?;
            purchase
                .session
                .as_ref()
                .map(|s| s.session_id)
                .ok_or(ShoppingError::ChainIncomplete("payment session"))?
        };
        let request = self.outbound(
            AgentId::CredentialsProvider,
            Payload::PaymentSession(SessionResult::authorize(session_id)),
        );
        let response = self.exchange_credentials(request).await?;
        let Payload::Authorization(result) = response.payload else {
            return Err(unexpected("authorization", &response.payload));
        };
        if let Some(failure) = result.failure {
            return Err(self.reject(purchase_id, PurchaseState::Transmitted, failure));
        }
        let authorization = result.authorization.ok_or(ShoppingError::UnexpectedPayload {
            expected: "authorization",
            actual: "empty authorization",
        })?;
        if authorization.status == AuthorizationStatus::Declined {
            self.commit(purchase_id, PurchaseState::Transmitted, |p| {
                p.state = PurchaseState::OtpFailed;
            })?;
            return Err(ShoppingError::Rejected(FailureInfo::new(
                "authorization_declined",
                FailureClass::Terminal,
                "authorization declined by risk policy",
            )));
        }
        let result = authorization.clone();
        self.commit(purchase_id, PurchaseState::Transmitted, move |p| {
            p.authorization = Some(authorization);
            p.state = PurchaseState::OtpPending;
        })?;
        Ok(result)
    }

    /// Submits the user's OTP and completes the purchase on capture:
    /// `OtpPending → Completed`.
    ///
    /// A wrong code within the attempt budget is transient — the purchase
    /// stays in `OtpPending` for another attempt. Exhausted attempts and
    /// expired windows are terminal.
    ///
    /// # Errors
    ///
    /// [`ShoppingError::Rejected`] carrying the provider's failure class.
    pub async fn submit_otp(&self, purchase_id: Uuid, code: &str) -> Result<Capture, ShoppingError> {
        let authorization_id = {
            let purchase = self.expect_state(purchase_id, PurchaseState::OtpPending)?;
            purchase
                .authorization
                .as_ref()
                .map(|a| a.authorization_id)
                .ok_or(ShoppingError::ChainIncomplete("authorization"))?
        };
        let request = self.outbound(
            AgentId::CredentialsProvider,
            Payload::Authorization(AuthorizationResult::attempt(OtpAttempt {
                authorization_id,
                code: code.to_owned(),
            })),
        );
        let response = self.exchange_credentials(request).await?;
        let Payload::CaptureResult(result) = response.payload else {
            return Err(unexpected("capture_result", &response.payload));
        };
        if let Some(failure) = result.failure {
            return Err(self.reject(purchase_id, PurchaseState::OtpPending, failure));
        }
        let capture = result.capture.ok_or(ShoppingError::UnexpectedPayload {
            expected: "capture_result",
            actual: "empty capture_result",
        })?;
        let result = capture.clone();
        self.commit(purchase_id, PurchaseState::OtpPending, move |p| {
            p.capture = Some(capture);
            if let Some(mandate) = p.payment_mandate.as_mut() {
                mandate.status = ap2::mandate::PaymentMandateStatus::Completed;
            }
            p.intent.consume();
            p.state = PurchaseState::Completed;
        })?;
        tracing::info!(%purchase_id, transaction_id = %result.transaction_id, "purchase completed");
        Ok(result)
    }

    /// Asks the merchant to fulfill the completed purchase.
    ///
    /// Runs from `Completed` and does not change the purchase state.
    ///
    /// # Errors
    ///
    /// Peer rejections (lapsed reservation) and state failures.
    pub async fn request_fulfillment(&self, purchase_id: Uuid) -> Result<Fulfillment, ShoppingError> {
        let (cart, capture) = {
            let purchase = self.expect_state(purchase_id, PurchaseState::Completed)?;
            let cart = purchase.cart.clone().ok_or(ShoppingError::ChainIncomplete("cart"))?;
            let capture = purchase
                .capture
                .clone()
                .ok_or(ShoppingError::ChainIncomplete("capture"))?;
            (cart, capture)
        };
        let request = self.outbound(
            AgentId::MerchantAgent,
            Payload::CartMandate(CartMandatePayload::fulfillment_request(cart, capture)),
        );
        let response = self.exchange_merchant(request).await?;
        let Payload::CartMandate(payload) = response.payload else {
            return Err(unexpected("cart_mandate", &response.payload));
        };
        if let Some(failure) = payload.failure {
            return Err(ShoppingError::Rejected(failure));
        }
        let fulfillment = payload.fulfillment.ok_or(ShoppingError::UnexpectedPayload {
            expected: "fulfillment",
            actual: "empty cart_mandate",
        })?;
        let result = fulfillment.clone();
        self.commit(purchase_id, PurchaseState::Completed, move |p| {
            p.fulfillment = Some(fulfillment);
        })?;
        Ok(result)
    }

    /// Unilaterally abandons the chain at any state before capture.
    ///
    /// Idempotent: abandoning an already-abandoned purchase is a no-op.
    /// Requires no cooperation from the peers — their stale continuations
    /// fail state preconditions when they arrive.
    ///
    /// # Errors
    ///
    /// [`ShoppingError::WrongState`] once the purchase completed.
    pub fn abandon(&self, purchase_id: Uuid) -> Result<(), ShoppingError> {
        let mut purchase = self
            .purchases
            .get_mut(&purchase_id)
            .ok_or(ShoppingError::UnknownPurchase(purchase_id))?;
        match purchase.state {
            PurchaseState::Abandoned => Ok(()),
            PurchaseState::Completed => Err(ShoppingError::WrongState {
                expected: PurchaseState::OtpPending,
                actual: PurchaseState::Completed,
            }),
            _ => {
                tracing::info!(%purchase_id, from = %purchase.state, "purchase abandoned");
                purchase.state = PurchaseState::Abandoned;
                Ok(())
            }
        }
    }

    // ---- internals ----------------------------------------------------

    /// Builds an outbound envelope and records its id in the correlation log.
    fn outbound(&self, receiver: AgentId, payload: Payload) -> Envelope {
        let envelope = Envelope::send(AgentId::ShoppingAgent, receiver, payload, None);
        self.observed.insert(envelope.message_id);
        envelope
    }

    async fn exchange_merchant(&self, request: Envelope) -> Result<Envelope, ShoppingError> {
        let response = self.merchant.exchange(request.clone()).await?;
        self.check_response(&request, &response, AgentId::MerchantAgent)?;
        Ok(response)
    }

    async fn exchange_credentials(&self, request: Envelope) -> Result<Envelope, ShoppingError> {
        let response = self.credentials.exchange(request.clone()).await?;
        self.check_response(&request, &response, AgentId::CredentialsProvider)?;
        Ok(response)
    }

    /// Validates a response envelope: signed, from the expected peer, and
    /// correlated to a message this agent has actually sent.
    fn check_response(
        &self,
        request: &Envelope,
        response: &Envelope,
        expected_sender: AgentId,
    ) -> Result<(), ShoppingError> {
        if !response.verify() {
            return Err(ShoppingError::BadSignature);
        }
        if response.sender_agent != expected_sender {
            return Err(ShoppingError::Correlation(format!(
                "response sent by {}, expected {expected_sender}",
                response.sender_agent
            )));
        }
        match response.in_response_to {
            Some(id) if id == request.message_id && self.observed.contains(&id) => {
                self.observed.insert(response.message_id);
                Ok(())
            }
            Some(id) => Err(ShoppingError::Correlation(format!(
                "response references unobserved message {id}"
            ))),
            None => Err(ShoppingError::Correlation(
                "response lacks in_response_to".to_owned(),
            )),
        }
    }

    /// Read-only state gate, cloning the purchase for use across an await.
    fn expect_state(
        &self,
        purchase_id: Uuid,
        expected: PurchaseState,
    ) -> Result<Purchase, ShoppingError> {
        let purchase = self
            .purchases
            .get(&purchase_id)
            .ok_or(ShoppingError::UnknownPurchase(purchase_id))?;
        if purchase.state != expected {
            return Err(ShoppingError::WrongState {
                expected,
                actual: purchase.state,
            });
        }
        Ok(purchase.clone())
    }

    /// Mutable state gate for local (no-await) operations.
    fn purchase_mut(
        &self,
        purchase_id: Uuid,
        expected: PurchaseState,
    ) -> Result<dashmap::mapref::one::RefMut<'_, Uuid, Purchase>, ShoppingError> {
        let purchase = self
            .purchases
            .get_mut(&purchase_id)
            .ok_or(ShoppingError::UnknownPurchase(purchase_id))?;
        if purchase.state != expected {
            return Err(ShoppingError::WrongState {
                expected,
                actual: purchase.state,
            });
        }
        Ok(purchase)
    }

    /// Commits a mutation after an exchange, re-checking that the state did
    /// not move while the request was in flight (e.g. a concurrent abandon).
    fn commit(
        &self,
        purchase_id: Uuid,
        expected: PurchaseState,
        apply: impl FnOnce(&mut Purchase),
    ) -> Result<(), ShoppingError> {
        let mut purchase = self.purchase_mut(purchase_id, expected)?;
        apply(&mut purchase);
        Ok(())
    }

    /// Applies a peer rejection: terminal classes move the purchase to the
    /// matching failure state; transient and precondition rejections leave
    /// it untouched for retry.
    fn reject(
        &self,
        purchase_id: Uuid,
        expected: PurchaseState,
        failure: FailureInfo,
    ) -> ShoppingError {
        let target = match failure.class {
            FailureClass::Terminal => Some(terminal_state_for(&failure.error_code)),
            FailureClass::Precondition if failure.error_code == "invalid_cart" => {
                Some(PurchaseState::CartInvalid)
            }
            _ => None,
        };
        if let Some(state) = target {
            if let Ok(mut purchase) = self.purchase_mut(purchase_id, expected) {
                tracing::warn!(%purchase_id, code = %failure.error_code, to = %state, "chain terminated");
                purchase.state = state;
            }
        }
        ShoppingError::Rejected(failure)
    }
}

/// Maps a terminal peer error code onto the purchase failure state.
fn terminal_state_for(error_code: &str) -> PurchaseState {
    if error_code.contains("expired") {
        PurchaseState::Expired
    } else {
        PurchaseState::OtpFailed
    }
}

fn unexpected(expected: &'static str, actual: &Payload) -> ShoppingError {
    ShoppingError::UnexpectedPayload {
        expected,
        actual: actual.action(),
    }
}
