#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the AP2 agent payment protocol.
//!
//! This crate provides the foundational types shared by the three AP2
//! participants — the shopping agent, the merchant agent, and the credentials
//! provider. It is transport-agnostic: envelopes are plain data, and delivery
//! is the responsibility of the embedding service.
//!
//! # Overview
//!
//! AP2 governs agent-mediated purchases through a chain of cryptographically
//! linked mandates. The shopping agent creates an [`mandate::IntentMandate`]
//! on the user's behalf, assembles a [`mandate::CartMandate`] that the
//! merchant countersigns, and derives a [`mandate::PaymentMandate`] that the
//! credentials provider settles through a session → authorization → OTP →
//! capture pipeline. Every cross-party exchange travels as an
//! [`envelope::Envelope`] whose payload is a tagged variant.
//!
//! # Modules
//!
//! - [`amount`] - Settlement-currency amounts with two-decimal normalization
//! - [`directory`] - User profiles, addresses, payment methods, credential tokens
//! - [`envelope`] - A2A message envelope, participants, and tagged payloads
//! - [`error`] - Shared failure taxonomy for protocol operations
//! - [`mandate`] - The Intent → Cart → Payment mandate chain
//! - [`payment`] - Payment session, authorization, capture, and refund types
//! - [`policy`] - Pluggable risk-scoring and OTP policies
//! - [`product`] - Merchant catalog records
//! - [`signature`] - Opaque deterministic signature tokens
//! - [`timestamp`] - Unix timestamp utilities for expiry windows

pub mod amount;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod mandate;
pub mod payment;
pub mod policy;
pub mod product;
pub mod signature;
pub mod timestamp;

pub use amount::Amount;
pub use envelope::{AgentId, Envelope, EnvelopeError, Payload};
pub use error::{FailureClass, FailureInfo};
pub use signature::SignatureToken;
pub use timestamp::UnixTimestamp;
