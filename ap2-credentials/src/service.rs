//! The credentials provider facade and A2A dispatch.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use ap2::directory::{
    Address, CredentialToken, PaymentMethod, UserProfile, effective_default,
};
use ap2::envelope::{
    AgentTransfer, DirectoryQuery, DirectoryResult, Envelope, Payload,
};
use ap2::error::Failure;
use ap2::mandate::PaymentMandate;
use ap2::payment::{
    Authorization, AuthorizationResult, AuthorizationStatus, Capture, CaptureResult, OtpAttempt,
    Refund, RefundRequest, RefundResult, SessionResult,
};
use ap2::policy::{FixedOtp, OtpPolicy, RiskScorer, WeightedRiskScorer};
use ap2::signature::SignatureToken;
use ap2::timestamp::UnixTimestamp;

use crate::directory::Directory;
use crate::error::CredentialsError;
use crate::pipeline::PaymentPipeline;

/// Capabilities this agent announces on A2A handshakes.
const CAPABILITIES: &[&str] = &[
    "credential_management",
    "payment_authorization",
    "address_lookup",
    "refund_processing",
];

/// Credential tokens expire one hour after issuance.
const TOKEN_TTL_SECS: u64 = 3600;

struct TokenEntry {
    token: CredentialToken,
    consumed: bool,
}

/// The credentials provider: reference-data reads, token issuance, and the
/// payment pipeline.
pub struct CredentialsService {
    directory: Arc<dyn Directory>,
    tokens: DashMap<String, TokenEntry>,
    pipeline: PaymentPipeline,
}

impl std::fmt::Debug for CredentialsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsService")
            .field("tokens", &self.tokens.len())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

impl CredentialsService {
    /// Creates a provider over an injected directory with the default
    /// policies: the weighted risk scorer and the fixed demo OTP.
    #[must_use]
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self::with_policies(
            directory,
            Arc::new(WeightedRiskScorer::new(vec!["tech_store_merchant".into()])),
            Arc::new(FixedOtp::default()),
        )
    }

    /// Creates a provider with explicit risk and OTP policies.
    #[must_use]
    pub fn with_policies(
        directory: Arc<dyn Directory>,
        risk: Arc<dyn RiskScorer>,
        otp: Arc<dyn OtpPolicy>,
    ) -> Self {
        Self {
            directory,
            tokens: DashMap::new(),
            pipeline: PaymentPipeline::new(risk, otp),
        }
    }

    /// The payment pipeline, exposed for direct settlement calls and tests.
    #[must_use]
    pub const fn pipeline(&self) -> &PaymentPipeline {
        &self.pipeline
    }

    /// Fetches a user profile.
    ///
    /// # Errors
    ///
    /// [`CredentialsError::UserNotFound`] when the email has no account.
    pub fn get_user_profile(&self, email: &str) -> Result<UserProfile, CredentialsError> {
        self.directory
            .profile(email)
            .ok_or_else(|| CredentialsError::UserNotFound(email.to_owned()))
    }

    /// Fetches the user's addresses plus the effective default.
    ///
    /// # Errors
    ///
    /// [`CredentialsError::UserNotFound`] when no addresses are on file.
    pub fn get_shipping_addresses(
        &self,
        email: &str,
    ) -> Result<(Vec<Address>, Option<Address>), CredentialsError> {
        let addresses = self.directory.addresses(email);
        if addresses.is_empty() {
            return Err(CredentialsError::UserNotFound(email.to_owned()));
        }
        let default = effective_default(&addresses, |a| a.is_default).cloned();
        Ok((addresses, default))
    }

    /// Fetches payment methods surviving the merchant's brand filter, plus
    /// the effective default for this response.
    ///
    /// If the filter eliminates the stored default, the first surviving
    /// method is promoted for this response only — stored preference is
    /// never mutated by a read.
    ///
    /// # Errors
    ///
    /// [`CredentialsError::UserNotFound`] when no methods are on file.
    pub fn get_payment_methods(
        &self,
        email: &str,
        accepted_brands: &[String],
    ) -> Result<(Vec<PaymentMethod>, Option<PaymentMethod>), CredentialsError> {
        let all = self.directory.payment_methods(email);
        if all.is_empty() {
            return Err(CredentialsError::UserNotFound(email.to_owned()));
        }
        let methods: Vec<PaymentMethod> = if accepted_brands.is_empty() {
            all
        } else {
            all.into_iter()
                .filter(|m| {
                    m.instrument
                        .brand()
                        .is_some_and(|b| accepted_brands.iter().any(|accepted| accepted == b))
                })
                .collect()
        };
        let default = effective_default(&methods, |m| m.is_default).cloned();
        Ok((methods, default))
    }

    /// Issues a single-use credential token for one payment method.
    ///
    /// # Errors
    ///
    /// [`CredentialsError::UserNotFound`] or
    /// [`CredentialsError::PaymentMethodNotFound`] when the inputs do not
    /// resolve.
    pub fn issue_credential_token(
        &self,
        email: &str,
        payment_method_id: &str,
    ) -> Result<CredentialToken, CredentialsError> {
        let methods = self.directory.payment_methods(email);
        if methods.is_empty() {
            return Err(CredentialsError::UserNotFound(email.to_owned()));
        }
        if !methods.iter().any(|m| m.payment_method_id == payment_method_id) {
            return Err(CredentialsError::PaymentMethodNotFound(
                payment_method_id.to_owned(),
            ));
        }

        let credential_token_id = Uuid::new_v4();
        let now = UnixTimestamp::now();
        let digest = SignatureToken::over(&[
            payment_method_id,
            email,
            &credential_token_id.to_string(),
        ]);
        let token = CredentialToken {
            credential_token_id,
            token: format!("cred_token_{}", &digest.as_str()[..32]),
            payment_method_id: payment_method_id.to_owned(),
            user_email: email.to_owned(),
            scope: vec![
                "payment_authorization".to_owned(),
                "payment_capture".to_owned(),
            ],
            single_use: true,
            generated_at: now,
            expires_at: now + TOKEN_TTL_SECS,
        };
        self.tokens.insert(
            token.token.clone(),
            TokenEntry {
                token: token.clone(),
                consumed: false,
            },
        );
        tracing::info!(payment_method_id, "credential token issued");
        Ok(token)
    }

    /// Creates a payment session for a transmitted, user-signed mandate.
    ///
    /// Resolves and consumes the mandate's single-use credential token, then
    /// hands off to the pipeline.
    ///
    /// # Errors
    ///
    /// Token resolution failures
    /// ([`CredentialsError::TokenNotFound`] / [`CredentialsError::TokenExpired`] /
    /// [`CredentialsError::TokenConsumed`]) and pipeline preconditions.
    pub fn create_session(
        &self,
        mandate: &PaymentMandate,
    ) -> Result<ap2::payment::PaymentSession, CredentialsError> {
        let user_email = {
            let mut entry = self
                .tokens
                .get_mut(&mandate.payment_token)
                .ok_or(CredentialsError::TokenNotFound)?;
            if entry.token.expires_at.is_expired() {
                return Err(CredentialsError::TokenExpired);
            }
            if entry.consumed {
                return Err(CredentialsError::TokenConsumed);
            }
            entry.consumed = true;
            entry.token.user_email.clone()
        };
        let profile = self.get_user_profile(&user_email)?;
        self.pipeline
            .create_session(mandate, user_email, profile.verification_level)
    }

    /// Authorizes a session. See [`PaymentPipeline::authorize`].
    ///
    /// # Errors
    ///
    /// Propagates pipeline session failures.
    pub fn authorize(&self, session_id: Uuid) -> Result<Authorization, CredentialsError> {
        self.pipeline.authorize(session_id)
    }

    /// Verifies an OTP attempt and captures on success.
    /// See [`PaymentPipeline::verify_otp_and_capture`].
    ///
    /// # Errors
    ///
    /// Propagates pipeline authorization failures.
    pub fn verify_otp_and_capture(
        &self,
        authorization_id: Uuid,
        code: &str,
    ) -> Result<Capture, CredentialsError> {
        self.pipeline.verify_otp_and_capture(authorization_id, code)
    }

    /// Refunds a completed capture. See [`PaymentPipeline::process_refund`].
    ///
    /// # Errors
    ///
    /// Propagates pipeline refund failures.
    pub fn process_refund(
        &self,
        transaction_id: Uuid,
        amount: ap2::amount::Amount,
        reason: impl Into<String>,
    ) -> Result<Refund, CredentialsError> {
        self.pipeline.process_refund(transaction_id, amount, reason)
    }

    /// A2A ingress: dispatches a request envelope and always answers with a
    /// well-formed response envelope — failures travel inside the payload.
    #[must_use]
    pub fn handle(&self, envelope: Envelope) -> Envelope {
        let response = match &envelope.payload {
            Payload::AgentTransfer(transfer) => self.handle_transfer(transfer),
            Payload::PaymentMandate(mandate) => match self.create_session(mandate) {
                Ok(session) => Payload::PaymentSession(SessionResult::created(session)),
                Err(err) => Payload::PaymentSession(SessionResult::rejected(err.to_info())),
            },
            Payload::PaymentSession(request) => self.handle_session(request),
            Payload::Authorization(request) => self.handle_authorization(request),
            Payload::RefundResult(request) => self.handle_refund(request),
            other => Payload::AgentTransfer(
                AgentTransfer::handshake("error", Vec::new())
                    .refused(CredentialsError::UnsupportedAction(other.action()).to_info()),
            ),
        };
        envelope.reply(response)
    }

    fn handle_transfer(&self, transfer: &AgentTransfer) -> Payload {
        let Some(query) = &transfer.query else {
            return Payload::AgentTransfer(AgentTransfer::handshake(
                format!("ack: {}", transfer.transfer_reason),
                CAPABILITIES.iter().map(|&c| c.to_owned()).collect(),
            ));
        };
        let answer = match query {
            DirectoryQuery::UserProfile { user_email } => self
                .get_user_profile(user_email)
                .map(DirectoryResult::UserProfile),
            DirectoryQuery::ShippingAddresses { user_email } => self
                .get_shipping_addresses(user_email)
                .map(|(addresses, default_address)| DirectoryResult::ShippingAddresses {
                    addresses,
                    default_address,
                }),
            DirectoryQuery::PaymentMethods {
                user_email,
                accepted_brands,
            } => self
                .get_payment_methods(user_email, accepted_brands)
                .map(|(methods, default_method)| DirectoryResult::PaymentMethods {
                    methods,
                    default_method,
                }),
            DirectoryQuery::CredentialToken {
                user_email,
                payment_method_id,
            } => self
                .issue_credential_token(user_email, payment_method_id)
                .map(DirectoryResult::CredentialToken),
        };
        match answer {
            Ok(result) => Payload::AgentTransfer(transfer.clone().answered(result)),
            Err(err) => Payload::AgentTransfer(transfer.clone().refused(err.to_info())),
        }
    }

    fn handle_session(&self, request: &SessionResult) -> Payload {
        let Some(session_id) = request.authorize_session_id else {
            return Payload::Authorization(AuthorizationResult::rejected(
                CredentialsError::UnsupportedAction("payment_session").to_info(),
            ));
        };
        match self.authorize(session_id) {
            Ok(authorization) => {
                let otp_hint = (authorization.status == AuthorizationStatus::PendingOtp)
                    .then(|| "Demo: use code 123".to_owned());
                Payload::Authorization(AuthorizationResult::granted(authorization, otp_hint))
            }
            Err(err) => Payload::Authorization(AuthorizationResult::rejected(err.to_info())),
        }
    }

    fn handle_authorization(&self, request: &AuthorizationResult) -> Payload {
        let Some(OtpAttempt {
            authorization_id,
            code,
        }) = &request.otp_attempt
        else {
            return Payload::CaptureResult(CaptureResult::rejected(
                CredentialsError::UnsupportedAction("authorization").to_info(),
            ));
        };
        match self.verify_otp_and_capture(*authorization_id, code) {
            Ok(capture) => Payload::CaptureResult(CaptureResult::completed(capture)),
            Err(err) => Payload::CaptureResult(CaptureResult::rejected(err.to_info())),
        }
    }

    fn handle_refund(&self, request: &RefundResult) -> Payload {
        let Some(RefundRequest {
            transaction_id,
            amount,
            reason,
        }) = &request.request
        else {
            return Payload::RefundResult(RefundResult::rejected(
                CredentialsError::UnsupportedAction("refund_result").to_info(),
            ));
        };
        match self.process_refund(*transaction_id, *amount, reason.clone()) {
            Ok(refund) => Payload::RefundResult(RefundResult::processed(refund)),
            Err(err) => Payload::RefundResult(RefundResult::rejected(err.to_info())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::demo_directory;
    use ap2::envelope::AgentId;
    use ap2::mandate::{CartItem, CartMandate, FulfillmentTerms};

    const EMAIL: &str = "bugsbunny@gmail.com";

    fn service() -> CredentialsService {
        CredentialsService::new(Arc::new(demo_directory()))
    }

    fn transmitted_mandate(service: &CredentialsService) -> PaymentMandate {
        let token = service
            .issue_credential_token(EMAIL, "pm_amex_8888")
            .unwrap();
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
            token.token,
            true,
            UnixTimestamp::now(),
        )
        .unwrap();
        mandate.sign_on_device("user_device_001");
        mandate.mark_transmitted().unwrap();
        mandate
    }

    #[test]
    fn test_profile_lookup() {
        let profile = service().get_user_profile(EMAIL).unwrap();
        assert_eq!(profile.user_id, "user_bugs_bunny");
        assert!(matches!(
            service().get_user_profile("nobody@example.com"),
            Err(CredentialsError::UserNotFound(_))
        ));
    }

    #[test]
    fn test_payment_methods_brand_filter_promotes_effective_default() {
        let service = service();
        // No filter: stored default wins.
        let (all, default) = service.get_payment_methods(EMAIL, &[]).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(default.unwrap().payment_method_id, "pm_amex_8888");

        // A filter that eliminates the default promotes the first survivor —
        // and a later unfiltered read still sees the stored default.
        let (visa_only, _) = service
            .get_payment_methods(EMAIL, &["visa".to_owned()])
            .unwrap();
        assert!(visa_only.is_empty());

        let (amex, default) = service
            .get_payment_methods(EMAIL, &["american_express".to_owned()])
            .unwrap();
        assert_eq!(amex.len(), 2);
        assert_eq!(default.unwrap().payment_method_id, "pm_amex_8888");

        let (_, stored_default) = service.get_payment_methods(EMAIL, &[]).unwrap();
        assert_eq!(stored_default.unwrap().payment_method_id, "pm_amex_8888");
    }

    #[test]
    fn test_brand_filter_excludes_bank_accounts() {
        let (methods, _) = service()
            .get_payment_methods(EMAIL, &["american_express".to_owned()])
            .unwrap();
        assert!(methods.iter().all(|m| m.instrument.brand().is_some()));
    }

    #[test]
    fn test_token_issuance_and_session() {
        let service = service();
        let mandate = transmitted_mandate(&service);
        let session = service.create_session(&mandate).unwrap();
        assert_eq!(session.amount.to_string(), "1133.00");
    }

    #[test]
    fn test_single_use_token_rejects_second_session() {
        let service = service();
        let mandate = transmitted_mandate(&service);
        service.create_session(&mandate).unwrap();
        let err = service.create_session(&mandate).unwrap_err();
        assert!(matches!(err, CredentialsError::TokenConsumed));
    }

    #[test]
    fn test_unknown_token_rejected() {
        let service = service();
        let mut mandate = transmitted_mandate(&service);
        mandate.payment_token = "cred_token_forged".into();
        let err = service.create_session(&mandate).unwrap_err();
        assert!(matches!(err, CredentialsError::TokenNotFound));
    }

    #[test]
    fn test_token_for_unknown_method_rejected() {
        let err = service()
            .issue_credential_token(EMAIL, "pm_missing")
            .unwrap_err();
        assert!(matches!(err, CredentialsError::PaymentMethodNotFound(_)));
    }

    #[test]
    fn test_handle_full_payment_exchange() {
        let service = service();
        let mandate = transmitted_mandate(&service);

        // Transmit mandate -> session.
        let request = Envelope::send(
            AgentId::ShoppingAgent,
            AgentId::CredentialsProvider,
            Payload::PaymentMandate(mandate),
            None,
        );
        let response = service.handle(request.clone());
        assert_eq!(response.in_response_to, Some(request.message_id));
        let session = match response.payload {
            Payload::PaymentSession(result) => result.session.unwrap(),
            other => panic!("unexpected payload {other:?}"),
        };

        // Authorize -> pending OTP with hint.
        let request = Envelope::send(
            AgentId::ShoppingAgent,
            AgentId::CredentialsProvider,
            Payload::PaymentSession(SessionResult::authorize(session.session_id)),
            None,
        );
        let authorization = match service.handle(request).payload {
            Payload::Authorization(result) => {
                assert_eq!(result.otp_hint.as_deref(), Some("Demo: use code 123"));
                result.authorization.unwrap()
            }
            other => panic!("unexpected payload {other:?}"),
        };
        assert_eq!(authorization.status, AuthorizationStatus::PendingOtp);

        // Wrong OTP -> transient failure payload, state intact.
        let request = Envelope::send(
            AgentId::ShoppingAgent,
            AgentId::CredentialsProvider,
            Payload::Authorization(AuthorizationResult::attempt(OtpAttempt {
                authorization_id: authorization.authorization_id,
                code: "000".into(),
            })),
            None,
        );
        match service.handle(request).payload {
            Payload::CaptureResult(result) => {
                let failure = result.failure.unwrap();
                assert_eq!(failure.error_code, "invalid_otp");
                assert!(failure.retry_allowed);
            }
            other => panic!("unexpected payload {other:?}"),
        }

        // Correct OTP -> capture.
        let request = Envelope::send(
            AgentId::ShoppingAgent,
            AgentId::CredentialsProvider,
            Payload::Authorization(AuthorizationResult::attempt(OtpAttempt {
                authorization_id: authorization.authorization_id,
                code: "123".into(),
            })),
            None,
        );
        let capture = match service.handle(request).payload {
            Payload::CaptureResult(result) => result.capture.unwrap(),
            other => panic!("unexpected payload {other:?}"),
        };
        assert_eq!(capture.amount.to_string(), "1133.00");

        // Refund through the envelope path.
        let request = Envelope::send(
            AgentId::ShoppingAgent,
            AgentId::CredentialsProvider,
            Payload::RefundResult(RefundResult::request(RefundRequest {
                transaction_id: capture.transaction_id,
                amount: "50.00".parse().unwrap(),
                reason: "customer_request".into(),
            })),
            None,
        );
        match service.handle(request).payload {
            Payload::RefundResult(result) => {
                assert!(result.refund.is_some());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_handle_directory_query() {
        let service = service();
        let request = Envelope::send(
            AgentId::ShoppingAgent,
            AgentId::CredentialsProvider,
            Payload::AgentTransfer(AgentTransfer::query(
                "credentials_request",
                DirectoryQuery::ShippingAddresses {
                    user_email: EMAIL.into(),
                },
            )),
            None,
        );
        match service.handle(request).payload {
            Payload::AgentTransfer(transfer) => match transfer.result.unwrap() {
                DirectoryResult::ShippingAddresses {
                    addresses,
                    default_address,
                } => {
                    assert_eq!(addresses.len(), 2);
                    assert_eq!(default_address.unwrap().address_id, "addr_001");
                }
                other => panic!("unexpected result {other:?}"),
            },
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
