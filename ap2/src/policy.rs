//! Pluggable risk-scoring and OTP policies.
//!
//! The authorization state machine treats risk scoring and OTP issuance as
//! policy, not protocol: the exact formula and code source can be swapped
//! without touching the pipeline. The defaults here reproduce the reference
//! behavior — a deterministic weighted score and the fixed demo code `123`.

use crate::amount::Amount;
use crate::directory::VerificationLevel;

/// Inputs to a risk-scoring decision.
#[derive(Debug, Clone)]
pub struct RiskContext<'a> {
    /// The amount being authorized.
    pub amount: &'a Amount,
    /// The fulfilling merchant.
    pub merchant_id: &'a str,
    /// The paying account's verification level.
    pub verification_level: VerificationLevel,
}

/// Computes a deterministic risk score for an authorization.
///
/// Scores are 0–100; higher means riskier. Implementations must be pure
/// functions of the context so replayed authorizations score identically.
pub trait RiskScorer: Send + Sync {
    /// Scores the given context.
    fn score(&self, ctx: &RiskContext<'_>) -> u8;
}

/// Default scorer: a weighted sum of amount band, merchant trust, and
/// account verification.
#[derive(Debug, Clone)]
pub struct WeightedRiskScorer {
    /// Merchants considered established; others add risk.
    pub trusted_merchants: Vec<String>,
}

impl WeightedRiskScorer {
    /// Amounts at or above this add the large-amount weight.
    const LARGE_AMOUNT: &'static str = "1000.00";

    /// Creates a scorer trusting the given merchants.
    #[must_use]
    pub const fn new(trusted_merchants: Vec<String>) -> Self {
        Self { trusted_merchants }
    }
}

impl RiskScorer for WeightedRiskScorer {
    fn score(&self, ctx: &RiskContext<'_>) -> u8 {
        let mut score: u8 = 5;
        if let Ok(threshold) = Self::LARGE_AMOUNT.parse::<Amount>() {
            if *ctx.amount >= threshold {
                score += 10;
            }
        }
        if !self.trusted_merchants.iter().any(|m| m == ctx.merchant_id) {
            score += 20;
        }
        if ctx.verification_level == VerificationLevel::Unverified {
            score += 30;
        }
        score
    }
}

/// Governs when an OTP challenge is required and what code satisfies it.
pub trait OtpPolicy: Send + Sync {
    /// Whether this authorization needs an OTP challenge.
    ///
    /// `mandate_requires` is the payment mandate's own flag; the policy may
    /// escalate on risk but never waive an explicit mandate requirement.
    fn challenge_required(&self, mandate_requires: bool, risk_score: u8) -> bool;

    /// Issues the code for a new challenge.
    fn issue_code(&self) -> String;

    /// How many wrong attempts are tolerated before the authorization is
    /// terminally declined.
    fn max_attempts(&self) -> u8 {
        3
    }

    /// How long an issued code stays valid, in seconds.
    fn validity_secs(&self) -> u64 {
        300
    }
}

/// Demo policy: always challenges when the mandate asks, escalates above a
/// risk threshold, and issues the fixed code `123`.
#[derive(Debug, Clone)]
pub struct FixedOtp {
    /// The code every challenge expects.
    pub code: String,
    /// Risk score at which a challenge is forced even if the mandate did not
    /// ask for one.
    pub risk_threshold: u8,
}

impl Default for FixedOtp {
    fn default() -> Self {
        Self {
            code: "123".to_owned(),
            risk_threshold: 50,
        }
    }
}

impl OtpPolicy for FixedOtp {
    fn challenge_required(&self, mandate_requires: bool, risk_score: u8) -> bool {
        mandate_requires || risk_score >= self.risk_threshold
    }

    fn issue_code(&self) -> String {
        self.code.clone()
    }
}
