#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! AP2 shopping orchestrator.
//!
//! The orchestrator drives an end-to-end purchase on the user's behalf: it
//! creates the intent mandate, assembles and relays the cart mandate to the
//! merchant for countersigning, gathers credentials from the provider,
//! derives and transmits the payment mandate, and walks the OTP challenge to
//! capture. Progress is a strictly forward per-purchase state machine
//! ([`state::PurchaseState`]); every cross-party step exchanges exactly one
//! A2A envelope with the relevant peer.
//!
//! # Modules
//!
//! - [`error`] - Orchestrator error taxonomy
//! - [`orchestrator`] - The [`orchestrator::ShoppingOrchestrator`] and its operations
//! - [`peer`] - Envelope-level peer interfaces and in-process implementations
//! - [`state`] - The purchase state machine

pub mod error;
pub mod orchestrator;
pub mod peer;
pub mod state;

pub use error::ShoppingError;
pub use orchestrator::{Purchase, ShoppingOrchestrator};
pub use peer::{CredentialsPeer, LocalCredentialsPeer, LocalMerchantPeer, MerchantPeer, PeerError};
pub use state::PurchaseState;
