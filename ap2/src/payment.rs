//! Payment session, authorization, capture, and refund records.
//!
//! These form the strictly ordered sub-chain owned by the credentials
//! provider: a [`PaymentSession`] binds the amount from a payment mandate, an
//! [`Authorization`] risk-scores and (usually) OTP-challenges it, and a
//! [`Capture`] converts the authorization into a completed transaction. Each
//! stage back-references its predecessor; stage N+1 is never created while
//! stage N sits in a terminal failure state. A [`Refund`] is the compensating
//! record, created only against completed captures.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::Amount;
use crate::error::FailureInfo;
use crate::timestamp::{SECS_PER_DAY, UnixTimestamp};

/// Clearing offset between capture and settlement, in days.
pub const SETTLEMENT_OFFSET_DAYS: u64 = 2;

/// Refunds clear within this many days of processing.
pub const REFUND_COMPLETION_DAYS: u64 = 3;

/// Lifecycle of a payment session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Open and usable.
    Created,
    /// The 30-minute window passed before authorization.
    Expired,
}

/// A payment session binding the amount and currency of one payment mandate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    /// Unique session identifier.
    pub session_id: Uuid,
    /// The transmitted payment mandate.
    pub payment_mandate_id: Uuid,
    /// Amount bound from the mandate.
    pub amount: Amount,
    /// Settlement currency code.
    pub currency: String,
    /// Current lifecycle state.
    pub status: SessionStatus,
    /// Whether settlement will require an OTP challenge.
    pub requires_otp: bool,
    /// Creation time.
    pub created_at: UnixTimestamp,
    /// Expiry deadline (30 minutes after creation).
    pub expires_at: UnixTimestamp,
}

/// Lifecycle of an authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    /// Waiting for the user's OTP.
    PendingOtp,
    /// Cleared for capture.
    Authorized,
    /// Terminally declined (risk, or OTP attempts exhausted).
    Declined,
    /// The authorization or OTP window expired.
    Expired,
}

/// A risk-scored authorization of one payment session.
///
/// An authorization code and settlement-network correlation id are recorded
/// even when the authorization is declined, for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Unique authorization identifier.
    pub authorization_id: Uuid,
    /// The authorized session.
    pub session_id: Uuid,
    /// Amount carried from the session.
    pub amount: Amount,
    /// Settlement currency code.
    pub currency: String,
    /// Current lifecycle state.
    pub status: AuthorizationStatus,
    /// Processor authorization code (audit).
    pub authorization_code: String,
    /// Settlement-network correlation id (audit).
    pub network_transaction_id: String,
    /// Deterministic risk score, 0–100.
    pub risk_score: u8,
    /// When authorization was performed.
    pub authorized_at: UnixTimestamp,
    /// Authorization validity deadline (24 hours).
    pub expires_at: UnixTimestamp,
    /// Where the OTP was sent, when one was issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp_sent_to: Option<String>,
    /// OTP validity deadline, when one was issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp_expires_at: Option<UnixTimestamp>,
}

/// Outcome of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    /// Funds captured; transaction complete.
    Completed,
    /// Capture failed at the settlement network.
    Failed,
}

/// A completed (or failed) settlement of one authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    /// Unique transaction identifier, the key for refunds and history.
    pub transaction_id: Uuid,
    /// Capture record identifier.
    pub capture_id: Uuid,
    /// The captured authorization.
    pub authorization_id: Uuid,
    /// Captured amount; always equals the authorization amount.
    pub amount: Amount,
    /// Settlement currency code.
    pub currency: String,
    /// Capture outcome.
    pub status: CaptureStatus,
    /// When funds were captured.
    pub captured_at: UnixTimestamp,
    /// Settlement date: capture date plus the fixed clearing offset.
    pub settlement_date: UnixTimestamp,
    /// Immutable receipt identifier.
    pub receipt_id: Uuid,
    /// Receipt retrieval URL.
    pub receipt_url: String,
}

impl Capture {
    /// Builds a completed capture for an authorization, stamping the
    /// settlement date at `captured_at + SETTLEMENT_OFFSET_DAYS`.
    #[must_use]
    pub fn completed(authorization: &Authorization, captured_at: UnixTimestamp) -> Self {
        let receipt_id = Uuid::new_v4();
        Self {
            transaction_id: Uuid::new_v4(),
            capture_id: Uuid::new_v4(),
            authorization_id: authorization.authorization_id,
            amount: authorization.amount,
            currency: authorization.currency.clone(),
            status: CaptureStatus::Completed,
            captured_at,
            settlement_date: captured_at + SETTLEMENT_OFFSET_DAYS * SECS_PER_DAY,
            receipt_id,
            receipt_url: format!("https://receipts.credprovider.example/{receipt_id}"),
        }
    }
}

/// Lifecycle of a refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    /// Accepted and queued for clearing.
    Processed,
}

/// A compensating refund against one completed capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    /// Unique refund identifier.
    pub refund_id: Uuid,
    /// The refunded transaction.
    pub original_transaction_id: Uuid,
    /// Refunded amount; cumulative refunds never exceed the captured amount.
    pub amount: Amount,
    /// Settlement currency code.
    pub currency: String,
    /// Caller-supplied reason.
    pub reason: String,
    /// Current lifecycle state.
    pub status: RefundStatus,
    /// When the refund was accepted.
    pub processed_at: UnixTimestamp,
    /// Expected clearing date.
    pub expected_completion: UnixTimestamp,
}

/// Wire container for session creation responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    /// The created session, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<PaymentSession>,
    /// The session to authorize, on an authorize request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorize_session_id: Option<Uuid>,
    /// Failure details, on rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

impl SessionResult {
    /// A successful session creation.
    #[must_use]
    pub const fn created(session: PaymentSession) -> Self {
        Self {
            session: Some(session),
            authorize_session_id: None,
            failure: None,
        }
    }

    /// A request to authorize an existing session.
    #[must_use]
    pub const fn authorize(session_id: Uuid) -> Self {
        Self {
            session: None,
            authorize_session_id: Some(session_id),
            failure: None,
        }
    }

    /// A rejected request.
    #[must_use]
    pub const fn rejected(failure: FailureInfo) -> Self {
        Self {
            session: None,
            authorize_session_id: None,
            failure: Some(failure),
        }
    }
}

/// One OTP verification attempt against an authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpAttempt {
    /// The challenged authorization.
    pub authorization_id: Uuid,
    /// The code the user entered.
    pub code: String,
}

/// Wire container for authorization requests and responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResult {
    /// The authorization record, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
    /// The OTP attempt, on a verification request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp_attempt: Option<OtpAttempt>,
    /// Demo hint for where/how the OTP was delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp_hint: Option<String>,
    /// Failure details, on rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

impl AuthorizationResult {
    /// A granted (or OTP-pending) authorization.
    #[must_use]
    pub const fn granted(authorization: Authorization, otp_hint: Option<String>) -> Self {
        Self {
            authorization: Some(authorization),
            otp_attempt: None,
            otp_hint,
            failure: None,
        }
    }

    /// An OTP verification request.
    #[must_use]
    pub const fn attempt(attempt: OtpAttempt) -> Self {
        Self {
            authorization: None,
            otp_attempt: Some(attempt),
            otp_hint: None,
            failure: None,
        }
    }

    /// A rejected request.
    #[must_use]
    pub const fn rejected(failure: FailureInfo) -> Self {
        Self {
            authorization: None,
            otp_attempt: None,
            otp_hint: None,
            failure: Some(failure),
        }
    }
}

/// Wire container for capture responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResult {
    /// The capture record, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<Capture>,
    /// Failure details, on rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

impl CaptureResult {
    /// A completed capture.
    #[must_use]
    pub const fn completed(capture: Capture) -> Self {
        Self {
            capture: Some(capture),
            failure: None,
        }
    }

    /// A rejected capture attempt.
    #[must_use]
    pub const fn rejected(failure: FailureInfo) -> Self {
        Self {
            capture: None,
            failure: Some(failure),
        }
    }
}

/// A refund request as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    /// The transaction to refund.
    pub transaction_id: Uuid,
    /// Amount to refund.
    pub amount: Amount,
    /// Caller-supplied reason.
    pub reason: String,
}

/// Wire container for refund requests and responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundResult {
    /// The processed refund, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund: Option<Refund>,
    /// The refund request, on a request envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RefundRequest>,
    /// Failure details, on rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

impl RefundResult {
    /// A processed refund.
    #[must_use]
    pub const fn processed(refund: Refund) -> Self {
        Self {
            refund: Some(refund),
            request: None,
            failure: None,
        }
    }

    /// A refund request.
    #[must_use]
    pub const fn request(request: RefundRequest) -> Self {
        Self {
            refund: None,
            request: Some(request),
            failure: None,
        }
    }

    /// A rejected refund.
    #[must_use]
    pub const fn rejected(failure: FailureInfo) -> Self {
        Self {
            refund: None,
            request: None,
            failure: Some(failure),
        }
    }
}
