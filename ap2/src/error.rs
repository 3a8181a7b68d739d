//! Shared failure taxonomy for AP2 protocol operations.
//!
//! Every rejection in the protocol falls into one of four classes, and the
//! class determines what the caller may do next:
//!
//! - [`FailureClass::Malformed`] — bad input; fix the syntax and resend
//! - [`FailureClass::Precondition`] — the mandate chain is not in the required
//!   state; fix the prerequisites, then retry
//! - [`FailureClass::Transient`] — the same operation may be retried as-is
//! - [`FailureClass::Terminal`] — the chain is dead; a fresh intent mandate
//!   is required
//!
//! No error ever crosses the A2A boundary as a panic or transport fault:
//! cross-service responses embed a [`FailureInfo`] in an otherwise well-formed
//! envelope payload, so a peer failure can block a caller's forward transition
//! but never corrupt its state machine.

use serde::{Deserialize, Serialize};

/// Classifies a protocol failure by what the caller may do about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Bad JSON or a missing required field. Rejected before any state change.
    Malformed,
    /// An invariant on the mandate chain is unmet. Rejected with no partial
    /// mutation; the caller should correct prerequisites, not syntax.
    Precondition,
    /// The same operation may be retried (e.g. a wrong OTP within the
    /// attempt budget, or stock that may free up).
    Transient,
    /// The mandate chain has moved to a failure state and must not be
    /// resumed.
    Terminal,
}

impl FailureClass {
    /// Whether the caller is allowed to retry the same operation.
    #[must_use]
    pub const fn retry_allowed(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// A structured failure carried inside a response payload.
///
/// Mirrors the shape every AP2 service reports: a machine-readable code, a
/// class for retry decisions, and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Machine-readable error code (e.g. `"invalid_otp"`).
    pub error_code: String,

    /// Failure class for the caller's retry decision.
    pub class: FailureClass,

    /// Human-readable diagnostic message.
    pub message: String,

    /// Whether the caller may retry the same operation.
    pub retry_allowed: bool,
}

impl FailureInfo {
    /// Creates a new failure record; `retry_allowed` follows the class.
    #[must_use]
    pub fn new(error_code: impl Into<String>, class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            class,
            message: message.into(),
            retry_allowed: class.retry_allowed(),
        }
    }
}

/// Implemented by service error types so failures can be classified and
/// embedded into response payloads uniformly.
pub trait Failure: std::error::Error {
    /// The failure class of this error.
    fn class(&self) -> FailureClass;

    /// Machine-readable error code for this error.
    fn error_code(&self) -> &'static str;

    /// Converts the error into a wire-ready [`FailureInfo`].
    fn to_info(&self) -> FailureInfo {
        FailureInfo::new(self.error_code(), self.class(), self.to_string())
    }
}
