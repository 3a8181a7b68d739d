//! Credentials provider error taxonomy.

use ap2::amount::Amount;
use ap2::error::{Failure, FailureClass};
use ap2::mandate::MandateError;

/// Errors raised by credentials provider operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    /// No account exists for the email.
    #[error("no account for {0:?}")]
    UserNotFound(String),

    /// The payment method id is not on file for the user.
    #[error("payment method {0:?} not found")]
    PaymentMethodNotFound(String),

    /// The credential token is not recognized.
    #[error("credential token not recognized")]
    TokenNotFound,

    /// The credential token's one-hour validity lapsed.
    #[error("credential token expired")]
    TokenExpired,

    /// Single-use token was already consumed by a session.
    #[error("credential token already used")]
    TokenConsumed,

    /// The payment mandate was transmitted without a user signature.
    #[error("payment mandate is not signed on the user's device")]
    MandateNotSigned,

    /// No session exists with the given id.
    #[error("payment session not found")]
    SessionNotFound,

    /// The 30-minute session window lapsed before authorization.
    #[error("payment session expired")]
    SessionExpired,

    /// No authorization exists with the given id.
    #[error("authorization not found")]
    AuthorizationNotFound,

    /// The authorization was terminally declined.
    #[error("authorization declined")]
    AuthorizationDeclined,

    /// The authorization's 24-hour validity lapsed.
    #[error("authorization expired")]
    AuthorizationExpired,

    /// The OTP validity window lapsed; the authorization is dead.
    #[error("OTP window expired")]
    OtpExpired,

    /// Wrong OTP code; retry allowed within the attempt budget.
    #[error("invalid OTP code, {attempts_remaining} attempt(s) remaining")]
    InvalidOtp {
        /// Attempts left before the authorization is declined.
        attempts_remaining: u8,
    },

    /// The attempt budget is exhausted; the authorization is declined.
    #[error("OTP attempts exhausted")]
    OtpAttemptsExhausted,

    /// No completed capture exists for the transaction id.
    #[error("transaction not found")]
    TransactionNotFound,

    /// The refund would push cumulative refunds past the captured amount.
    #[error(
        "refund of {requested} exceeds remaining headroom (captured {captured}, already refunded {refunded})"
    )]
    AmountExceedsCaptured {
        /// The captured amount.
        captured: Amount,
        /// Already refunded against this capture.
        refunded: Amount,
        /// The rejected request amount.
        requested: Amount,
    },

    /// Refund amounts must be positive.
    #[error("refund amount must be positive")]
    InvalidRefundAmount,

    /// A mandate-chain precondition was rejected.
    #[error(transparent)]
    Mandate(#[from] MandateError),

    /// The request payload does not match any provider operation.
    #[error("unsupported payload action {0:?} for credentials provider")]
    UnsupportedAction(&'static str),
}

impl Failure for CredentialsError {
    fn class(&self) -> FailureClass {
        match self {
            Self::InvalidOtp { .. } => FailureClass::Transient,
            Self::TokenExpired
            | Self::SessionExpired
            | Self::AuthorizationDeclined
            | Self::AuthorizationExpired
            | Self::OtpExpired
            | Self::OtpAttemptsExhausted => FailureClass::Terminal,
            Self::UserNotFound(_)
            | Self::PaymentMethodNotFound(_)
            | Self::TokenNotFound
            | Self::TokenConsumed
            | Self::MandateNotSigned
            | Self::SessionNotFound
            | Self::AuthorizationNotFound
            | Self::TransactionNotFound
            | Self::AmountExceedsCaptured { .. } => FailureClass::Precondition,
            Self::InvalidRefundAmount | Self::UnsupportedAction(_) => FailureClass::Malformed,
            Self::Mandate(err) => err.class(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "user_not_found",
            Self::PaymentMethodNotFound(_) => "payment_method_not_found",
            Self::TokenNotFound => "token_not_found",
            Self::TokenExpired => "token_expired",
            Self::TokenConsumed => "token_consumed",
            Self::MandateNotSigned => "mandate_not_signed",
            Self::SessionNotFound => "session_not_found",
            Self::SessionExpired => "session_expired",
            Self::AuthorizationNotFound => "authorization_not_found",
            Self::AuthorizationDeclined => "authorization_declined",
            Self::AuthorizationExpired => "authorization_expired",
            Self::OtpExpired => "otp_expired",
            Self::InvalidOtp { .. } => "invalid_otp",
            Self::OtpAttemptsExhausted => "otp_attempts_exhausted",
            Self::TransactionNotFound => "transaction_not_found",
            Self::AmountExceedsCaptured { .. } => "amount_exceeds_captured",
            Self::InvalidRefundAmount => "invalid_refund_amount",
            Self::Mandate(err) => err.error_code(),
            Self::UnsupportedAction(_) => "unsupported_action",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_otp_is_transient() {
        let err = CredentialsError::InvalidOtp {
            attempts_remaining: 2,
        };
        assert_eq!(err.class(), FailureClass::Transient);
        assert!(err.to_info().retry_allowed);
        assert_eq!(err.error_code(), "invalid_otp");
    }

    #[test]
    fn test_otp_expiry_is_terminal_not_transient() {
        assert_eq!(CredentialsError::OtpExpired.class(), FailureClass::Terminal);
        assert!(!CredentialsError::OtpExpired.to_info().retry_allowed);
    }

    #[test]
    fn test_refund_headroom_is_precondition() {
        let err = CredentialsError::AmountExceedsCaptured {
            captured: "1133.00".parse().unwrap(),
            refunded: "50.00".parse().unwrap(),
            requested: "1100.00".parse().unwrap(),
        };
        assert_eq!(err.class(), FailureClass::Precondition);
        assert_eq!(err.error_code(), "amount_exceeds_captured");
    }
}
