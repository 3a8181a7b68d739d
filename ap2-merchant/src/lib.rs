#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! AP2 merchant agent.
//!
//! The merchant owns the product catalog and the available-to-sell stock. It
//! validates carts against live inventory, countersigns cart mandates as a
//! fulfillment guarantee, holds inventory reservations during checkout, and
//! fulfills orders once a capture completes.
//!
//! # Modules
//!
//! - [`catalog`] - Read-only product catalog provider
//! - [`error`] - Merchant error taxonomy
//! - [`inventory`] - Reserved-stock accounting with per-product serialization
//! - [`service`] - The [`service::MerchantService`] facade and A2A dispatch

pub mod catalog;
pub mod error;
pub mod inventory;
pub mod service;

pub use catalog::{InMemoryCatalog, ProductCatalog};
pub use error::MerchantError;
pub use inventory::{Inventory, Reservation, ReservationStatus};
pub use service::MerchantService;
