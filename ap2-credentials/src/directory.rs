//! User reference data store.
//!
//! Profiles, addresses, and payment methods are keyed by user email. The
//! single-default invariant — exactly one `default` entry per collection —
//! is enforced when a collection is written, never patched up during reads.

use std::collections::HashMap;
use std::sync::RwLock;

use ap2::directory::{
    Address, Capability, Instrument, PaymentMethod, UserProfile, VerificationLevel,
};
use ap2::timestamp::UnixTimestamp;

/// Read access to user reference data. Absence is "not found", never an
/// empty default record.
pub trait Directory: Send + Sync {
    /// Looks up a profile by email.
    fn profile(&self, email: &str) -> Option<UserProfile>;

    /// The user's shipping addresses, stored order preserved.
    fn addresses(&self, email: &str) -> Vec<Address>;

    /// The user's payment methods, stored order preserved.
    fn payment_methods(&self, email: &str) -> Vec<PaymentMethod>;
}

#[derive(Default)]
struct UserRecord {
    profile: Option<UserProfile>,
    addresses: Vec<Address>,
    payment_methods: Vec<PaymentMethod>,
}

/// An in-memory directory with write-time default enforcement.
///
/// Loaded once at service construction; requests never mutate it.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl std::fmt::Debug for InMemoryDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let users = self.users.read().map(|u| u.len()).unwrap_or(0);
        f.debug_struct("InMemoryDirectory").field("users", &users).finish()
    }
}

impl InMemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a profile, creating the user record if needed.
    pub fn put_profile(&self, profile: UserProfile) {
        if let Ok(mut users) = self.users.write() {
            let key = profile.email.clone();
            users.entry(key).or_default().profile = Some(profile);
        }
    }

    /// Appends an address, maintaining the single-default invariant: a new
    /// default demotes the previous one, and the first address of a
    /// collection is always promoted to default.
    pub fn put_address(&self, email: &str, mut address: Address) {
        if let Ok(mut users) = self.users.write() {
            let record = users.entry(email.to_owned()).or_default();
            if record.addresses.is_empty() {
                address.is_default = true;
            } else if address.is_default {
                for existing in &mut record.addresses {
                    existing.is_default = false;
                }
            }
            record.addresses.push(address);
        }
    }

    /// Appends a payment method under the same single-default invariant as
    /// [`Self::put_address`].
    pub fn put_payment_method(&self, email: &str, mut method: PaymentMethod) {
        if let Ok(mut users) = self.users.write() {
            let record = users.entry(email.to_owned()).or_default();
            if record.payment_methods.is_empty() {
                method.is_default = true;
            } else if method.is_default {
                for existing in &mut record.payment_methods {
                    existing.is_default = false;
                }
            }
            record.payment_methods.push(method);
        }
    }
}

impl Directory for InMemoryDirectory {
    fn profile(&self, email: &str) -> Option<UserProfile> {
        self.users
            .read()
            .ok()
            .and_then(|users| users.get(email).and_then(|r| r.profile.clone()))
    }

    fn addresses(&self, email: &str) -> Vec<Address> {
        self.users
            .read()
            .ok()
            .and_then(|users| users.get(email).map(|r| r.addresses.clone()))
            .unwrap_or_default()
    }

    fn payment_methods(&self, email: &str) -> Vec<PaymentMethod> {
        self.users
            .read()
            .ok()
            .and_then(|users| users.get(email).map(|r| r.payment_methods.clone()))
            .unwrap_or_default()
    }
}

/// The demo user directory used by the reference deployment and tests.
#[must_use]
pub fn demo_directory() -> InMemoryDirectory {
    let directory = InMemoryDirectory::new();
    let email = "bugsbunny@gmail.com";

    directory.put_profile(UserProfile {
        user_id: "user_bugs_bunny".into(),
        full_name: "Bugs Bunny".into(),
        email: email.into(),
        phone: "+1-000-000-0000".into(),
        account_created: UnixTimestamp::from_secs(1_579_082_400),
        account_status: "active".into(),
        verification_level: VerificationLevel::Verified,
    });

    directory.put_address(
        email,
        Address {
            address_id: "addr_001".into(),
            recipient: "Bugs Bunny".into(),
            address_line_1: "123 Main St".into(),
            address_line_2: Some("Apt 4B".into()),
            city: "Sample City".into(),
            state: "ST".into(),
            zip_code: "00000".into(),
            country: "US".into(),
            is_default: true,
        },
    );
    directory.put_address(
        email,
        Address {
            address_id: "addr_002".into(),
            recipient: "Bugs Bunny".into(),
            address_line_1: "456 Business Ave".into(),
            address_line_2: Some("Suite 100".into()),
            city: "Corporate City".into(),
            state: "ST".into(),
            zip_code: "11111".into(),
            country: "US".into(),
            is_default: false,
        },
    );

    directory.put_payment_method(
        email,
        PaymentMethod {
            payment_method_id: "pm_amex_4444".into(),
            instrument: Instrument::CreditCard {
                brand: "american_express".into(),
                last_four: "4444".into(),
                exp_month: 12,
                exp_year: 2027,
                cardholder_name: "Bugs Bunny".into(),
                billing_country: "US".into(),
            },
            is_default: false,
            verified: true,
            capabilities: vec![Capability::Purchase, Capability::Refund],
        },
    );
    directory.put_payment_method(
        email,
        PaymentMethod {
            payment_method_id: "pm_amex_8888".into(),
            instrument: Instrument::CreditCard {
                brand: "american_express".into(),
                last_four: "8888".into(),
                exp_month: 8,
                exp_year: 2026,
                cardholder_name: "Bugs Bunny".into(),
                billing_country: "US".into(),
            },
            is_default: true,
            verified: true,
            capabilities: vec![Capability::Purchase, Capability::Refund],
        },
    );
    directory.put_payment_method(
        email,
        PaymentMethod {
            payment_method_id: "pm_bank_001".into(),
            instrument: Instrument::BankAccount {
                bank_name: "Chase Bank".into(),
                account_type: "checking".into(),
                account_last_four: "1234".into(),
                routing_last_four: "0001".into(),
                account_holder_name: "Bugs Bunny".into(),
            },
            is_default: false,
            verified: true,
            capabilities: vec![Capability::Purchase],
        },
    );

    directory
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absence_is_not_found() {
        let directory = demo_directory();
        assert!(directory.profile("nobody@example.com").is_none());
        assert!(directory.addresses("nobody@example.com").is_empty());
    }

    #[test]
    fn test_exactly_one_default_address() {
        let directory = demo_directory();
        let addresses = directory.addresses("bugsbunny@gmail.com");
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses.iter().filter(|a| a.is_default).count(), 1);
    }

    #[test]
    fn test_exactly_one_default_method() {
        let directory = demo_directory();
        let methods = directory.payment_methods("bugsbunny@gmail.com");
        assert_eq!(methods.len(), 3);
        let defaults: Vec<_> = methods.iter().filter(|m| m.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].payment_method_id, "pm_amex_8888");
    }

    #[test]
    fn test_new_default_demotes_previous() {
        let directory = demo_directory();
        directory.put_address(
            "bugsbunny@gmail.com",
            Address {
                address_id: "addr_003".into(),
                recipient: "Bugs Bunny".into(),
                address_line_1: "789 New Rd".into(),
                address_line_2: None,
                city: "New City".into(),
                state: "ST".into(),
                zip_code: "22222".into(),
                country: "US".into(),
                is_default: true,
            },
        );
        let addresses = directory.addresses("bugsbunny@gmail.com");
        assert_eq!(addresses.iter().filter(|a| a.is_default).count(), 1);
        assert!(addresses.last().unwrap().is_default);
    }

    #[test]
    fn test_first_entry_forced_default() {
        let directory = InMemoryDirectory::new();
        directory.put_address(
            "new@example.com",
            Address {
                address_id: "addr_x".into(),
                recipient: "New User".into(),
                address_line_1: "1 First St".into(),
                address_line_2: None,
                city: "Town".into(),
                state: "ST".into(),
                zip_code: "33333".into(),
                country: "US".into(),
                is_default: false,
            },
        );
        assert!(directory.addresses("new@example.com")[0].is_default);
    }
}
