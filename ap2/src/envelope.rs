//! A2A message envelope, participants, and tagged payloads.
//!
//! Every cross-party exchange in AP2 travels as an [`Envelope`]: a uniquely
//! identified, timestamped, signed message between two recognized
//! participants. The payload is a tagged variant ([`Payload`]) decoded at the
//! envelope boundary — no opaque JSON is threaded through protocol logic.
//!
//! The envelope layer constructs and validates messages; routing and delivery
//! belong to the embedding service. Signature verification here is advisory
//! (see [`SignatureToken`](crate::signature::SignatureToken)), but
//! [`Envelope::verify`] is the contract point a real PKI slots into.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

use crate::directory::{Address, CredentialToken, PaymentMethod, UserProfile};
use crate::error::{Failure, FailureClass, FailureInfo};
use crate::mandate::{CartMandate, CartValidation, Fulfillment, IntentMandate, PaymentMandate};
use crate::payment::{AuthorizationResult, Capture, CaptureResult, RefundResult, SessionResult};
use crate::product::Product;
use crate::signature::SignatureToken;
use crate::timestamp::UnixTimestamp;

/// Protocol marker that serializes as the string `"A2A"` and rejects any
/// other value on deserialization.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct A2aProtocol;

impl Serialize for A2aProtocol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("A2A")
    }
}

impl<'de> Deserialize<'de> for A2aProtocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == "A2A" {
            Ok(Self)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected protocol \"A2A\", got {s:?}"
            )))
        }
    }
}

/// Version marker that serializes as the string `"1.0"` and rejects any
/// other value on deserialization.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct A2aVersion;

impl Serialize for A2aVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("1.0")
    }
}

impl<'de> Deserialize<'de> for A2aVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == "1.0" {
            Ok(Self)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected version \"1.0\", got {s:?}"
            )))
        }
    }
}

/// The three recognized AP2 participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    /// The shopping orchestrator acting for the user.
    ShoppingAgent,
    /// The merchant agent acting for the seller.
    MerchantAgent,
    /// The credentials provider acting as payment trust anchor.
    CredentialsProvider,
}

impl Display for AgentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ShoppingAgent => "shopping_agent",
            Self::MerchantAgent => "merchant_agent",
            Self::CredentialsProvider => "credentials_provider",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AgentId {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shopping_agent" => Ok(Self::ShoppingAgent),
            "merchant_agent" => Ok(Self::MerchantAgent),
            "credentials_provider" => Ok(Self::CredentialsProvider),
            other => Err(EnvelopeError::UnknownSender(other.to_owned())),
        }
    }
}

/// A typed query for credentials-provider reference data, carried inside an
/// [`AgentTransfer`] payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DirectoryQuery {
    /// Fetch the user's profile.
    UserProfile {
        /// Lookup key.
        user_email: String,
    },
    /// Fetch the user's shipping addresses.
    ShippingAddresses {
        /// Lookup key.
        user_email: String,
    },
    /// Fetch payment methods, optionally filtered to accepted card brands.
    PaymentMethods {
        /// Lookup key.
        user_email: String,
        /// Brands the merchant accepts; empty means no filter.
        #[serde(default)]
        accepted_brands: Vec<String>,
    },
    /// Issue a credential token for one payment method.
    CredentialToken {
        /// Lookup key.
        user_email: String,
        /// The method to tokenize.
        payment_method_id: String,
    },
}

/// A typed reference-data response, carried inside an [`AgentTransfer`]
/// payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DirectoryResult {
    /// The user's profile.
    UserProfile(UserProfile),
    /// The user's addresses with the effective default first-class.
    ShippingAddresses {
        /// All addresses on file.
        addresses: Vec<Address>,
        /// The effective default for this response.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_address: Option<Address>,
    },
    /// Payment methods surviving the brand filter.
    PaymentMethods {
        /// Matching methods.
        methods: Vec<PaymentMethod>,
        /// The effective default for this response; never mutates stored
        /// preference.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_method: Option<PaymentMethod>,
    },
    /// An issued credential token.
    CredentialToken(CredentialToken),
}

/// A2A handshake / reference-data payload.
///
/// Plain transfers (no `query`) establish a session and announce required
/// capabilities; transfers with a `query` request reference data and come
/// back with `result` or `failure` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTransfer {
    /// Why the conversation is moving to this peer.
    pub transfer_reason: String,
    /// Session established for the exchange.
    pub session_id: Uuid,
    /// Capabilities the sender expects from the peer.
    #[serde(default)]
    pub capabilities_required: Vec<String>,
    /// Reference-data query, on request envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<DirectoryQuery>,
    /// Reference-data result, on response envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DirectoryResult>,
    /// Failure details, on rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

impl AgentTransfer {
    /// A plain handshake transfer.
    #[must_use]
    pub fn handshake(reason: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            transfer_reason: reason.into(),
            session_id: Uuid::new_v4(),
            capabilities_required: capabilities,
            query: None,
            result: None,
            failure: None,
        }
    }

    /// A reference-data query transfer.
    #[must_use]
    pub fn query(reason: impl Into<String>, query: DirectoryQuery) -> Self {
        Self {
            transfer_reason: reason.into(),
            session_id: Uuid::new_v4(),
            capabilities_required: Vec::new(),
            query: Some(query),
            result: None,
            failure: None,
        }
    }

    /// A response carrying a reference-data result.
    #[must_use]
    pub fn answered(mut self, result: DirectoryResult) -> Self {
        self.query = None;
        self.result = Some(result);
        self
    }

    /// A response carrying a failure.
    #[must_use]
    pub fn refused(mut self, failure: FailureInfo) -> Self {
        self.query = None;
        self.failure = Some(failure);
        self
    }
}

/// Catalog browse payload: query fields on requests, products on responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProductCatalogPayload {
    /// Free-text search query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Category filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Maximum products to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    /// Matching products, on responses.
    #[serde(default)]
    pub products: Vec<Product>,
    /// Catalog size before filtering, on responses.
    #[serde(default)]
    pub total_products: usize,
}

/// Cart mandate payload: drafts on requests; signed carts, validation
/// outcomes, or fulfillment records on responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartMandatePayload {
    /// The cart being exchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart: Option<CartMandate>,
    /// Merchant validation outcome, on responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<CartValidation>,
    /// Completed capture accompanying a fulfillment request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<Capture>,
    /// Fulfillment record, on post-payment responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment: Option<Fulfillment>,
    /// Failure details, on rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

impl CartMandatePayload {
    /// A request or response carrying just a cart.
    #[must_use]
    pub const fn cart(cart: CartMandate) -> Self {
        Self {
            cart: Some(cart),
            validation: None,
            capture: None,
            fulfillment: None,
            failure: None,
        }
    }

    /// A signed-cart response with its validation outcome.
    #[must_use]
    pub const fn signed(cart: CartMandate, validation: CartValidation) -> Self {
        Self {
            cart: Some(cart),
            validation: Some(validation),
            capture: None,
            fulfillment: None,
            failure: None,
        }
    }

    /// A post-payment fulfillment request: the signed cart plus its capture.
    #[must_use]
    pub const fn fulfillment_request(cart: CartMandate, capture: Capture) -> Self {
        Self {
            cart: Some(cart),
            validation: None,
            capture: Some(capture),
            fulfillment: None,
            failure: None,
        }
    }

    /// A fulfillment response.
    #[must_use]
    pub const fn fulfilled(fulfillment: Fulfillment) -> Self {
        Self {
            cart: None,
            validation: None,
            capture: None,
            fulfillment: Some(fulfillment),
            failure: None,
        }
    }

    /// A rejection, optionally carrying the failed validation.
    #[must_use]
    pub const fn rejected(failure: FailureInfo, validation: Option<CartValidation>) -> Self {
        Self {
            cart: None,
            validation,
            capture: None,
            fulfillment: None,
            failure: Some(failure),
        }
    }
}

/// The tagged payload of an A2A envelope.
///
/// The `action` discriminator types each payload; unrecognized actions fail
/// structural validation in [`Envelope::receive`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Payload {
    /// An intent mandate.
    IntentMandate(IntentMandate),
    /// A cart mandate exchange.
    CartMandate(CartMandatePayload),
    /// A payment mandate transmission.
    PaymentMandate(PaymentMandate),
    /// A payment session exchange.
    PaymentSession(SessionResult),
    /// An authorization exchange (grant or OTP attempt).
    Authorization(AuthorizationResult),
    /// A capture outcome.
    CaptureResult(CaptureResult),
    /// A refund exchange.
    RefundResult(RefundResult),
    /// A catalog browse exchange.
    ProductCatalog(ProductCatalogPayload),
    /// A handshake or reference-data exchange.
    AgentTransfer(AgentTransfer),
}

impl Payload {
    /// The wire value of this payload's `action` discriminator.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::IntentMandate(_) => "intent_mandate",
            Self::CartMandate(_) => "cart_mandate",
            Self::PaymentMandate(_) => "payment_mandate",
            Self::PaymentSession(_) => "payment_session",
            Self::Authorization(_) => "authorization",
            Self::CaptureResult(_) => "capture_result",
            Self::RefundResult(_) => "refund_result",
            Self::ProductCatalog(_) => "product_catalog",
            Self::AgentTransfer(_) => "agent_transfer",
        }
    }

    /// Canonical digest of the payload, the signed portion of an envelope.
    ///
    /// # Panics
    ///
    /// Panics if payload serialization fails, which cannot happen for these
    /// types (no non-string map keys, no fallible serializers).
    #[must_use]
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).expect("payload types always serialize");
        SignatureToken::over(&[&String::from_utf8_lossy(&bytes)]).to_string()
    }
}

/// Errors raised by envelope construction and validation.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Required fields are absent or malformed.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The sender is not a recognized protocol participant.
    #[error("unknown sender agent {0:?}")]
    UnknownSender(String),
}

impl Failure for EnvelopeError {
    fn class(&self) -> FailureClass {
        FailureClass::Malformed
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope(_) => "malformed_envelope",
            Self::UnknownSender(_) => "unknown_sender",
        }
    }
}

/// An A2A message envelope.
///
/// `message_id` values are globally unique per sender; `in_response_to`, when
/// present, must reference a `message_id` the receiver has previously
/// observed (enforced by the receiver's correlation log, not by this type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Always `"A2A"`.
    pub protocol: A2aProtocol,
    /// Always `"1.0"`.
    pub version: A2aVersion,
    /// Unique message identifier.
    pub message_id: Uuid,
    /// The sending participant.
    pub sender_agent: AgentId,
    /// The receiving participant.
    pub receiver_agent: AgentId,
    /// The request this message answers, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<Uuid>,
    /// When the envelope was constructed.
    pub timestamp: UnixTimestamp,
    /// The typed payload.
    pub payload: Payload,
    /// Signature over `(sender, receiver, payload digest)`.
    pub signature: SignatureToken,
}

impl Envelope {
    /// Constructs a signed envelope with a fresh unique `message_id`.
    ///
    /// Construction has no side effects — delivery is the caller's concern.
    #[must_use]
    pub fn send(
        sender: AgentId,
        receiver: AgentId,
        payload: Payload,
        in_response_to: Option<Uuid>,
    ) -> Self {
        let signature = Self::compute_signature(sender, receiver, &payload);
        Self {
            protocol: A2aProtocol,
            version: A2aVersion,
            message_id: Uuid::new_v4(),
            sender_agent: sender,
            receiver_agent: receiver,
            in_response_to,
            timestamp: UnixTimestamp::now(),
            payload,
            signature,
        }
    }

    /// Constructs the response envelope to this message: sender and receiver
    /// swapped, `in_response_to` bound to this message's id.
    #[must_use]
    pub fn reply(&self, payload: Payload) -> Self {
        Self::send(
            self.receiver_agent,
            self.sender_agent,
            payload,
            Some(self.message_id),
        )
    }

    /// Parses and structurally validates a raw envelope.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::MalformedEnvelope`] if the JSON is invalid or a
    /// required field is absent or ill-typed;
    /// [`EnvelopeError::UnknownSender`] if the sender is not a recognized
    /// participant. The two are distinguished so callers can tell a syntax
    /// problem from an authorization problem.
    pub fn receive(raw: &str) -> Result<Self, EnvelopeError> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| EnvelopeError::MalformedEnvelope("expected a JSON object".into()))?;

        for field in [
            "protocol",
            "version",
            "message_id",
            "sender_agent",
            "receiver_agent",
            "timestamp",
            "payload",
            "signature",
        ] {
            if !object.contains_key(field) {
                return Err(EnvelopeError::MalformedEnvelope(format!(
                    "missing required field {field:?}"
                )));
            }
        }

        // Distinguish an unrecognized participant from a malformed document
        // before handing the value to serde.
        for field in ["sender_agent", "receiver_agent"] {
            let name = object[field].as_str().ok_or_else(|| {
                EnvelopeError::MalformedEnvelope(format!("{field} must be a string"))
            })?;
            name.parse::<AgentId>()?;
        }

        serde_json::from_value(value).map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))
    }

    /// Advisory signature verification.
    ///
    /// Recomputes the signature over `(sender, receiver, payload digest)`.
    /// The check is deterministic-hash-based in this core; a deployment with
    /// real key management replaces this method without touching callers.
    #[must_use]
    pub fn verify(&self) -> bool {
        self.signature
            == Self::compute_signature(self.sender_agent, self.receiver_agent, &self.payload)
    }

    fn compute_signature(sender: AgentId, receiver: AgentId, payload: &Payload) -> SignatureToken {
        SignatureToken::over(&[
            &sender.to_string(),
            &receiver.to_string(),
            &payload.digest(),
        ])
    }
}
