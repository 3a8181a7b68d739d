//! Opaque deterministic signature tokens.
//!
//! AP2 models signatures as verifiable opaque tokens rather than real
//! public-key signatures: a token is the hex-encoded SHA-256 digest of a
//! canonical `:`-joined tuple of the signed fields. The [`SignatureToken::over`]
//! / [`SignatureToken::verify_over`] pair is the contract point — a deployment
//! with real key management swaps the digest for an asymmetric scheme without
//! touching any caller.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};

/// An opaque signature token bound to a canonical tuple of fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureToken(String);

impl SignatureToken {
    /// Computes the token over a canonical tuple of parts.
    ///
    /// Parts are joined with `:` before hashing, matching the canonical
    /// form used by every signer in the protocol. The same parts always
    /// produce the same token.
    #[must_use]
    pub fn over(parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(parts.join(":").as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Checks that this token was computed over the given parts.
    #[must_use]
    pub fn verify_over(&self, parts: &[&str]) -> bool {
        *self == Self::over(parts)
    }

    /// Returns the token as a hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SignatureToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = SignatureToken::over(&["merchant", "1133.00", "cart-1"]);
        let b = SignatureToken::over(&["merchant", "1133.00", "cart-1"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_verify_matches() {
        let token = SignatureToken::over(&["user_7", "laptop"]);
        assert!(token.verify_over(&["user_7", "laptop"]));
    }

    #[test]
    fn test_verify_rejects_tamper() {
        let token = SignatureToken::over(&["user_7", "laptop"]);
        assert!(!token.verify_over(&["user_7", "tablet"]));
    }

    #[test]
    fn test_part_boundaries_matter() {
        // "ab" + "c" must not collide with "a" + "bc".
        let left = SignatureToken::over(&["ab", "c"]);
        let right = SignatureToken::over(&["a", "bc"]);
        assert_ne!(left, right);
    }

    #[test]
    fn test_serde_transparent() {
        let token = SignatureToken::over(&["x"]);
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, format!("\"{token}\""));
    }
}
