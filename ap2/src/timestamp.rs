//! Unix timestamp utilities for AP2 expiry windows.
//!
//! Every time-bounded record in the protocol — intent mandates, cart
//! mandates, inventory reservations, payment sessions, authorizations, and
//! OTP challenges — carries an expiry expressed as a [`UnixTimestamp`].
//! Expiry is checked lazily at the next access rather than by a background
//! sweep, so the comparison helpers here take the observation time as an
//! argument.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::{Add, Sub};
use std::time::SystemTime;

/// Seconds in one day, used for settlement-date arithmetic.
pub const SECS_PER_DAY: u64 = 86_400;

/// A Unix timestamp representing seconds since the Unix epoch (1970-01-01T00:00:00Z).
///
/// # Serialization
///
/// Serialized as a stringified integer to avoid loss of precision in JSON,
/// since `JavaScript`'s `Number` type cannot safely represent all 64-bit
/// integers.
///
/// ```json
/// "1699999999"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnixTimestamp(u64);

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let ts = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))?;
        Ok(Self(ts))
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_add(rhs))
    }
}

impl Sub<u64> for UnixTimestamp {
    type Output = Self;

    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_sub(rhs))
    }
}

impl UnixTimestamp {
    /// Creates a new [`UnixTimestamp`] from a raw seconds value.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Returns the current system time as a [`UnixTimestamp`].
    ///
    /// # Panics
    ///
    /// Panics if the system clock is set to a time before the Unix epoch,
    /// which should never happen on properly configured systems.
    #[must_use]
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("SystemTime before UNIX epoch?!?")
            .as_secs();
        Self(now)
    }

    /// Returns the current time advanced by `secs` seconds.
    ///
    /// Convenience for constructing expiry deadlines.
    #[must_use]
    pub fn now_plus(secs: u64) -> Self {
        Self::now() + secs
    }

    /// Returns the timestamp as raw seconds since the Unix epoch.
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Returns the timestamp truncated to whole days since the Unix epoch.
    ///
    /// Merchant cart signatures are computed over the signing *date*, not the
    /// signing instant, so repeated signings within one day stay deterministic.
    #[must_use]
    pub const fn as_days(&self) -> u64 {
        self.0 / SECS_PER_DAY
    }

    /// Whether this deadline has passed as of `now`.
    #[must_use]
    pub const fn is_expired_at(&self, now: Self) -> bool {
        self.0 < now.0
    }

    /// Whether this deadline has passed as of the current system time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Self::now())
    }

    /// Seconds remaining until this deadline as of `now`, zero if passed.
    #[must_use]
    pub const fn remaining_at(&self, now: Self) -> u64 {
        self.0.saturating_sub(now.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_as_string() {
        let ts = UnixTimestamp::from_secs(1_699_999_999);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"1699999999\"");
    }

    #[test]
    fn test_deserialize_from_string() {
        let ts: UnixTimestamp = serde_json::from_str("\"1699999999\"").unwrap();
        assert_eq!(ts.as_secs(), 1_699_999_999);
    }

    #[test]
    fn test_deserialize_rejects_non_numeric() {
        let result: Result<UnixTimestamp, _> = serde_json::from_str("\"soon\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_expiry_comparison() {
        let deadline = UnixTimestamp::from_secs(1_000);
        assert!(!deadline.is_expired_at(UnixTimestamp::from_secs(999)));
        assert!(!deadline.is_expired_at(UnixTimestamp::from_secs(1_000)));
        assert!(deadline.is_expired_at(UnixTimestamp::from_secs(1_001)));
    }

    #[test]
    fn test_add_saturates() {
        let ts = UnixTimestamp::from_secs(u64::MAX) + 10;
        assert_eq!(ts.as_secs(), u64::MAX);
    }

    #[test]
    fn test_days_truncation() {
        let ts = UnixTimestamp::from_secs(2 * SECS_PER_DAY + 12_345);
        assert_eq!(ts.as_days(), 2);
    }

    #[test]
    fn test_remaining() {
        let deadline = UnixTimestamp::from_secs(1_500);
        assert_eq!(deadline.remaining_at(UnixTimestamp::from_secs(1_000)), 500);
        assert_eq!(deadline.remaining_at(UnixTimestamp::from_secs(2_000)), 0);
    }
}
