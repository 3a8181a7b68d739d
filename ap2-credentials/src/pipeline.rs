//! The session → authorization → OTP → capture pipeline, plus refunds.
//!
//! A strictly ordered sub-chain: each stage back-references its predecessor
//! and is only created while the predecessor is in a non-terminal-failure
//! state. Expiry is checked lazily at the next access. All mutation of one
//! entity (a session, an authorization, a capture's refund headroom) happens
//! under that entity's map entry lock.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use ap2::amount::Amount;
use ap2::directory::VerificationLevel;
use ap2::mandate::PaymentMandate;
use ap2::payment::{
    Authorization, AuthorizationStatus, Capture, PaymentSession, REFUND_COMPLETION_DAYS, Refund,
    RefundStatus, SessionStatus,
};
use ap2::policy::{OtpPolicy, RiskContext, RiskScorer};
use ap2::timestamp::{SECS_PER_DAY, UnixTimestamp};

use crate::error::CredentialsError;

/// Sessions expire 30 minutes after creation.
const SESSION_TTL_SECS: u64 = 30 * 60;

/// Authorizations stay valid for 24 hours.
const AUTHORIZATION_TTL_SECS: u64 = SECS_PER_DAY;

/// Risk scores at or above this are declined outright.
const DECLINE_THRESHOLD: u8 = 80;

struct SessionRecord {
    session: PaymentSession,
    merchant_id: String,
    user_email: String,
    verification_level: VerificationLevel,
}

struct AuthEntry {
    authorization: Authorization,
    user_email: String,
    otp_code: Option<String>,
    attempts_remaining: u8,
}

struct CaptureEntry {
    capture: Capture,
    user_email: String,
    refunded: Amount,
}

/// The credentials provider's payment state machine.
pub struct PaymentPipeline {
    sessions: DashMap<Uuid, SessionRecord>,
    authorizations: DashMap<Uuid, AuthEntry>,
    captures: DashMap<Uuid, CaptureEntry>,
    refunds: DashMap<Uuid, Refund>,
    risk: Arc<dyn RiskScorer>,
    otp: Arc<dyn OtpPolicy>,
}

impl std::fmt::Debug for PaymentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentPipeline")
            .field("sessions", &self.sessions.len())
            .field("authorizations", &self.authorizations.len())
            .field("captures", &self.captures.len())
            .finish()
    }
}

impl PaymentPipeline {
    /// Creates a pipeline over the given risk and OTP policies.
    #[must_use]
    pub fn new(risk: Arc<dyn RiskScorer>, otp: Arc<dyn OtpPolicy>) -> Self {
        Self {
            sessions: DashMap::new(),
            authorizations: DashMap::new(),
            captures: DashMap::new(),
            refunds: DashMap::new(),
            risk,
            otp,
        }
    }

    /// Creates a session binding the amount and currency of a transmitted
    /// payment mandate.
    ///
    /// # Errors
    ///
    /// [`CredentialsError::MandateNotSigned`] unless the mandate carries a
    /// user device signature.
    pub fn create_session(
        &self,
        mandate: &PaymentMandate,
        user_email: impl Into<String>,
        verification_level: VerificationLevel,
    ) -> Result<PaymentSession, CredentialsError> {
        if mandate.user_signature.is_none() {
            return Err(CredentialsError::MandateNotSigned);
        }
        let now = UnixTimestamp::now();
        let session = PaymentSession {
            session_id: Uuid::new_v4(),
            payment_mandate_id: mandate.payment_mandate_id,
            amount: mandate.total_amount,
            currency: "USD".to_owned(),
            status: SessionStatus::Created,
            requires_otp: mandate.requires_otp,
            created_at: now,
            expires_at: now + SESSION_TTL_SECS,
        };
        self.sessions.insert(
            session.session_id,
            SessionRecord {
                session: session.clone(),
                merchant_id: mandate.merchant_id.clone().unwrap_or_default(),
                user_email: user_email.into(),
                verification_level,
            },
        );
        tracing::info!(
            session_id = %session.session_id,
            amount = %session.amount,
            "payment session created"
        );
        Ok(session)
    }

    /// Risk-scores and authorizes a session.
    ///
    /// The score is a pure function of amount, merchant, and verification
    /// level, so replays authorize identically. An authorization code and
    /// settlement-network correlation id are recorded even on decline. When
    /// the OTP policy requires a challenge the authorization parks in
    /// `PendingOtp` with a five-minute code window; otherwise it is
    /// `Authorized` immediately.
    ///
    /// # Errors
    ///
    /// [`CredentialsError::SessionNotFound`] for unknown sessions,
    /// [`CredentialsError::SessionExpired`] when the 30-minute window lapsed
    /// (the session is marked expired as a side effect).
    pub fn authorize(&self, session_id: Uuid) -> Result<Authorization, CredentialsError> {
        let mut record = self
            .sessions
            .get_mut(&session_id)
            .ok_or(CredentialsError::SessionNotFound)?;
        let now = UnixTimestamp::now();
        if record.session.status == SessionStatus::Expired
            || record.session.expires_at.is_expired_at(now)
        {
            record.session.status = SessionStatus::Expired;
            return Err(CredentialsError::SessionExpired);
        }

        let risk_score = self.risk.score(&RiskContext {
            amount: &record.session.amount,
            merchant_id: &record.merchant_id,
            verification_level: record.verification_level,
        });
        let challenge = self
            .otp
            .challenge_required(record.session.requires_otp, risk_score);

        let status = if risk_score >= DECLINE_THRESHOLD {
            AuthorizationStatus::Declined
        } else if challenge {
            AuthorizationStatus::PendingOtp
        } else {
            AuthorizationStatus::Authorized
        };

        let mut authorization = Authorization {
            authorization_id: Uuid::new_v4(),
            session_id,
            amount: record.session.amount,
            currency: record.session.currency.clone(),
            status,
            authorization_code: authorization_code(),
            network_transaction_id: format!("ntxn_{}", Uuid::new_v4()),
            risk_score,
            authorized_at: now,
            expires_at: now + AUTHORIZATION_TTL_SECS,
            otp_sent_to: None,
            otp_expires_at: None,
        };

        let mut otp_code = None;
        if status == AuthorizationStatus::PendingOtp {
            authorization.otp_sent_to = Some("phone_on_file".to_owned());
            authorization.otp_expires_at = Some(now + self.otp.validity_secs());
            otp_code = Some(self.otp.issue_code());
        }

        let user_email = record.user_email.clone();
        drop(record);

        self.authorizations.insert(
            authorization.authorization_id,
            AuthEntry {
                authorization: authorization.clone(),
                user_email,
                otp_code,
                attempts_remaining: self.otp.max_attempts(),
            },
        );
        tracing::info!(
            authorization_id = %authorization.authorization_id,
            risk_score,
            status = ?authorization.status,
            "payment authorized"
        );
        Ok(authorization)
    }

    /// Verifies an OTP attempt and captures the authorization on success.
    ///
    /// Within the attempt budget a wrong code is transient and leaves state
    /// unchanged apart from the decremented budget; exhausting the budget
    /// terminally declines the authorization. An attempt after the OTP
    /// window is terminal expiry, not a retryable failure. An authorization
    /// that never needed a challenge captures directly.
    ///
    /// # Errors
    ///
    /// See [`CredentialsError`] — `InvalidOtp` is the only transient arm.
    pub fn verify_otp_and_capture(
        &self,
        authorization_id: Uuid,
        code: &str,
    ) -> Result<Capture, CredentialsError> {
        let mut entry = self
            .authorizations
            .get_mut(&authorization_id)
            .ok_or(CredentialsError::AuthorizationNotFound)?;
        let now = UnixTimestamp::now();

        match entry.authorization.status {
            AuthorizationStatus::Declined => return Err(CredentialsError::AuthorizationDeclined),
            AuthorizationStatus::Expired => return Err(CredentialsError::AuthorizationExpired),
            AuthorizationStatus::Authorized | AuthorizationStatus::PendingOtp => {}
        }
        if entry.authorization.expires_at.is_expired_at(now) {
            entry.authorization.status = AuthorizationStatus::Expired;
            return Err(CredentialsError::AuthorizationExpired);
        }

        if entry.authorization.status == AuthorizationStatus::PendingOtp {
            if entry
                .authorization
                .otp_expires_at
                .is_some_and(|deadline| deadline.is_expired_at(now))
            {
                entry.authorization.status = AuthorizationStatus::Expired;
                return Err(CredentialsError::OtpExpired);
            }
            if entry.otp_code.as_deref() != Some(code) {
                entry.attempts_remaining = entry.attempts_remaining.saturating_sub(1);
                if entry.attempts_remaining == 0 {
                    entry.authorization.status = AuthorizationStatus::Declined;
                    tracing::warn!(%authorization_id, "OTP attempts exhausted, authorization declined");
                    return Err(CredentialsError::OtpAttemptsExhausted);
                }
                return Err(CredentialsError::InvalidOtp {
                    attempts_remaining: entry.attempts_remaining,
                });
            }
            entry.authorization.status = AuthorizationStatus::Authorized;
        }

        let capture = Capture::completed(&entry.authorization, now);
        let user_email = entry.user_email.clone();
        drop(entry);

        self.captures.insert(
            capture.transaction_id,
            CaptureEntry {
                capture: capture.clone(),
                user_email,
                refunded: Amount::ZERO,
            },
        );
        tracing::info!(
            transaction_id = %capture.transaction_id,
            amount = %capture.amount,
            settlement = %capture.settlement_date,
            "payment captured"
        );
        Ok(capture)
    }

    /// Refunds part or all of a completed capture.
    ///
    /// Headroom is enforced atomically under the capture's entry lock: the
    /// cumulative refunded amount can never exceed the captured amount, no
    /// matter how requests interleave.
    ///
    /// # Errors
    ///
    /// [`CredentialsError::InvalidRefundAmount`] for non-positive amounts,
    /// [`CredentialsError::TransactionNotFound`] for unknown transactions,
    /// [`CredentialsError::AmountExceedsCaptured`] when headroom is exceeded.
    pub fn process_refund(
        &self,
        transaction_id: Uuid,
        amount: Amount,
        reason: impl Into<String>,
    ) -> Result<Refund, CredentialsError> {
        if !amount.is_positive() {
            return Err(CredentialsError::InvalidRefundAmount);
        }
        let mut entry = self
            .captures
            .get_mut(&transaction_id)
            .ok_or(CredentialsError::TransactionNotFound)?;

        let headroom = entry
            .capture
            .amount
            .checked_sub(entry.refunded)
            .unwrap_or(Amount::ZERO);
        if amount > headroom {
            return Err(CredentialsError::AmountExceedsCaptured {
                captured: entry.capture.amount,
                refunded: entry.refunded,
                requested: amount,
            });
        }
        entry.refunded = entry
            .refunded
            .checked_add(amount)
            .ok_or(CredentialsError::InvalidRefundAmount)?;
        let currency = entry.capture.currency.clone();
        drop(entry);

        let now = UnixTimestamp::now();
        let refund = Refund {
            refund_id: Uuid::new_v4(),
            original_transaction_id: transaction_id,
            amount,
            currency,
            reason: reason.into(),
            status: RefundStatus::Processed,
            processed_at: now,
            expected_completion: now + REFUND_COMPLETION_DAYS * SECS_PER_DAY,
        };
        self.refunds.insert(refund.refund_id, refund.clone());
        tracing::info!(
            refund_id = %refund.refund_id,
            %transaction_id,
            amount = %refund.amount,
            "refund processed"
        );
        Ok(refund)
    }

    /// The user's completed captures, most recent first.
    #[must_use]
    pub fn transaction_history(&self, user_email: &str, limit: usize) -> Vec<Capture> {
        let mut captures: Vec<Capture> = self
            .captures
            .iter()
            .filter(|entry| entry.user_email == user_email)
            .map(|entry| entry.capture.clone())
            .collect();
        captures.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        captures.truncate(limit);
        captures
    }

    /// Snapshot of one session, for tests and diagnostics.
    #[must_use]
    pub fn session(&self, session_id: &Uuid) -> Option<PaymentSession> {
        self.sessions.get(session_id).map(|r| r.session.clone())
    }

    /// Snapshot of one authorization, for tests and diagnostics.
    #[must_use]
    pub fn authorization(&self, authorization_id: &Uuid) -> Option<Authorization> {
        self.authorizations
            .get(authorization_id)
            .map(|e| e.authorization.clone())
    }

    #[cfg(test)]
    fn force_otp_deadline(&self, authorization_id: &Uuid, deadline: UnixTimestamp) {
        if let Some(mut entry) = self.authorizations.get_mut(authorization_id) {
            entry.authorization.otp_expires_at = Some(deadline);
        }
    }
}

/// Processor authorization codes: `AUTH` plus eight uppercase hex characters.
fn authorization_code() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("AUTH{}", hex[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap2::mandate::{CartItem, CartMandate, FulfillmentTerms, PaymentMandate};
    use ap2::policy::{FixedOtp, WeightedRiskScorer};
    use ap2::signature::SignatureToken;

    fn pipeline() -> PaymentPipeline {
        PaymentPipeline::new(
            Arc::new(WeightedRiskScorer::new(vec!["tech_store_merchant".into()])),
            Arc::new(FixedOtp::default()),
        )
    }

    fn signed_mandate(requires_otp: bool) -> PaymentMandate {
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
        let mut mandate = PaymentMandate::for_cart(
            &cart,
            "1133.00".parse().unwrap(),
            "1.50".parse().unwrap(),
            "2.00".parse().unwrap(),
            "cred_token_test",
            requires_otp,
            UnixTimestamp::now(),
        )
        .unwrap();
        mandate.sign_on_device("user_device_001");
        mandate.mark_transmitted().unwrap();
        mandate
    }

    fn pending_authorization(pipeline: &PaymentPipeline) -> Authorization {
        let session = pipeline
            .create_session(
                &signed_mandate(true),
                "bugsbunny@gmail.com",
                VerificationLevel::Verified,
            )
            .unwrap();
        pipeline.authorize(session.session_id).unwrap()
    }

    #[test]
    fn test_session_binds_mandate_amount() {
        let pipeline = pipeline();
        let session = pipeline
            .create_session(
                &signed_mandate(true),
                "bugsbunny@gmail.com",
                VerificationLevel::Verified,
            )
            .unwrap();
        assert_eq!(session.amount.to_string(), "1133.00");
        assert_eq!(session.status, SessionStatus::Created);
        assert_eq!(
            session.expires_at.as_secs() - session.created_at.as_secs(),
            30 * 60
        );
    }

    #[test]
    fn test_session_rejects_unsigned_mandate() {
        let pipeline = pipeline();
        let mut mandate = signed_mandate(true);
        mandate.user_signature = None;
        let err = pipeline
            .create_session(&mandate, "bugsbunny@gmail.com", VerificationLevel::Verified)
            .unwrap_err();
        assert!(matches!(err, CredentialsError::MandateNotSigned));
    }

    #[test]
    fn test_authorize_pends_on_otp() {
        let pipeline = pipeline();
        let authorization = pending_authorization(&pipeline);
        assert_eq!(authorization.status, AuthorizationStatus::PendingOtp);
        assert_eq!(authorization.risk_score, 15);
        assert!(authorization.authorization_code.starts_with("AUTH"));
        assert!(authorization.network_transaction_id.starts_with("ntxn_"));
        assert!(authorization.otp_expires_at.is_some());
    }

    #[test]
    fn test_authorize_skips_otp_when_not_required() {
        let pipeline = pipeline();
        let session = pipeline
            .create_session(
                &signed_mandate(false),
                "bugsbunny@gmail.com",
                VerificationLevel::Verified,
            )
            .unwrap();
        let authorization = pipeline.authorize(session.session_id).unwrap();
        assert_eq!(authorization.status, AuthorizationStatus::Authorized);
        assert!(authorization.otp_expires_at.is_none());
    }

    #[test]
    fn test_authorize_expired_session_is_terminal() {
        let pipeline = pipeline();
        let session = pipeline
            .create_session(
                &signed_mandate(true),
                "bugsbunny@gmail.com",
                VerificationLevel::Verified,
            )
            .unwrap();
        pipeline
            .sessions
            .get_mut(&session.session_id)
            .unwrap()
            .session
            .expires_at = UnixTimestamp::from_secs(0);
        let err = pipeline.authorize(session.session_id).unwrap_err();
        assert!(matches!(err, CredentialsError::SessionExpired));
        assert_eq!(
            pipeline.session(&session.session_id).unwrap().status,
            SessionStatus::Expired
        );
    }

    #[test]
    fn test_correct_otp_captures_with_settlement_offset() {
        let pipeline = pipeline();
        let authorization = pending_authorization(&pipeline);
        let capture = pipeline
            .verify_otp_and_capture(authorization.authorization_id, "123")
            .unwrap();
        assert_eq!(capture.amount, authorization.amount);
        assert_eq!(
            capture.settlement_date.as_secs(),
            capture.captured_at.as_secs() + 2 * SECS_PER_DAY
        );
        assert_eq!(
            pipeline
                .authorization(&authorization.authorization_id)
                .unwrap()
                .status,
            AuthorizationStatus::Authorized
        );
    }

    #[test]
    fn test_wrong_otp_is_retryable_and_leaves_state() {
        let pipeline = pipeline();
        let authorization = pending_authorization(&pipeline);
        let err = pipeline
            .verify_otp_and_capture(authorization.authorization_id, "000")
            .unwrap_err();
        assert!(matches!(
            err,
            CredentialsError::InvalidOtp {
                attempts_remaining: 2
            }
        ));
        // State unchanged: still pending, and the right code still captures.
        assert_eq!(
            pipeline
                .authorization(&authorization.authorization_id)
                .unwrap()
                .status,
            AuthorizationStatus::PendingOtp
        );
        pipeline
            .verify_otp_and_capture(authorization.authorization_id, "123")
            .unwrap();
    }

    #[test]
    fn test_exhausted_attempts_decline_terminally() {
        let pipeline = pipeline();
        let authorization = pending_authorization(&pipeline);
        for _ in 0..2 {
            let err = pipeline
                .verify_otp_and_capture(authorization.authorization_id, "000")
                .unwrap_err();
            assert!(matches!(err, CredentialsError::InvalidOtp { .. }));
        }
        let err = pipeline
            .verify_otp_and_capture(authorization.authorization_id, "000")
            .unwrap_err();
        assert!(matches!(err, CredentialsError::OtpAttemptsExhausted));
        // Even the right code is refused now.
        let err = pipeline
            .verify_otp_and_capture(authorization.authorization_id, "123")
            .unwrap_err();
        assert!(matches!(err, CredentialsError::AuthorizationDeclined));
    }

    #[test]
    fn test_otp_after_window_is_terminal() {
        let pipeline = pipeline();
        let authorization = pending_authorization(&pipeline);
        pipeline.force_otp_deadline(&authorization.authorization_id, UnixTimestamp::from_secs(0));
        let err = pipeline
            .verify_otp_and_capture(authorization.authorization_id, "123")
            .unwrap_err();
        assert!(matches!(err, CredentialsError::OtpExpired));
        assert_eq!(
            pipeline
                .authorization(&authorization.authorization_id)
                .unwrap()
                .status,
            AuthorizationStatus::Expired
        );
    }

    #[test]
    fn test_refund_decrements_headroom() {
        let pipeline = pipeline();
        let authorization = pending_authorization(&pipeline);
        let capture = pipeline
            .verify_otp_and_capture(authorization.authorization_id, "123")
            .unwrap();

        let refund = pipeline
            .process_refund(
                capture.transaction_id,
                "50.00".parse().unwrap(),
                "customer_request",
            )
            .unwrap();
        assert_eq!(refund.status, RefundStatus::Processed);
        assert_eq!(
            refund.expected_completion.as_secs(),
            refund.processed_at.as_secs() + 3 * SECS_PER_DAY
        );

        // 1100.00 > remaining 1083.00 headroom.
        let err = pipeline
            .process_refund(
                capture.transaction_id,
                "1100.00".parse().unwrap(),
                "customer_request",
            )
            .unwrap_err();
        assert!(matches!(err, CredentialsError::AmountExceedsCaptured { .. }));

        // The remaining headroom still refunds.
        pipeline
            .process_refund(
                capture.transaction_id,
                "1083.00".parse().unwrap(),
                "customer_request",
            )
            .unwrap();
        let err = pipeline
            .process_refund(capture.transaction_id, "0.01".parse().unwrap(), "again")
            .unwrap_err();
        assert!(matches!(err, CredentialsError::AmountExceedsCaptured { .. }));
    }

    #[test]
    fn test_refund_unknown_transaction() {
        let pipeline = pipeline();
        let err = pipeline
            .process_refund(Uuid::new_v4(), "10.00".parse().unwrap(), "why not")
            .unwrap_err();
        assert!(matches!(err, CredentialsError::TransactionNotFound));
    }

    #[test]
    fn test_refund_rejects_non_positive_amount() {
        let pipeline = pipeline();
        let err = pipeline
            .process_refund(Uuid::new_v4(), Amount::ZERO, "zero")
            .unwrap_err();
        assert!(matches!(err, CredentialsError::InvalidRefundAmount));
    }

    #[test]
    fn test_transaction_history_filters_by_user() {
        let pipeline = pipeline();
        let authorization = pending_authorization(&pipeline);
        pipeline
            .verify_otp_and_capture(authorization.authorization_id, "123")
            .unwrap();
        assert_eq!(pipeline.transaction_history("bugsbunny@gmail.com", 10).len(), 1);
        assert!(pipeline.transaction_history("elmer@example.com", 10).is_empty());
    }
}
