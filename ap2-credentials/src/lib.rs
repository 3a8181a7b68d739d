#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! AP2 credentials provider.
//!
//! The credentials provider is the payment trust anchor: it owns user
//! profiles, shipping addresses, and payment methods, issues single-use
//! credential tokens, and settles transmitted payment mandates through the
//! session → authorization → OTP → capture pipeline. Refunds compensate
//! completed captures without ever exceeding the captured amount.
//!
//! # Modules
//!
//! - [`directory`] - User reference data store with write-time default enforcement
//! - [`error`] - Credentials error taxonomy
//! - [`pipeline`] - The session/authorization/capture/refund state machine
//! - [`service`] - The [`service::CredentialsService`] facade and A2A dispatch

pub mod directory;
pub mod error;
pub mod pipeline;
pub mod service;

pub use directory::{Directory, InMemoryDirectory};
pub use error::CredentialsError;
pub use pipeline::PaymentPipeline;
pub use service::CredentialsService;
