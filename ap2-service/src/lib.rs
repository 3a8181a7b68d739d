#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! AP2 merchant and credentials provider HTTP service.
//!
//! Hosts both peer services behind one axum router: each service exposes a
//! single A2A ingress endpoint that accepts a request envelope and answers
//! with a response envelope, exactly as the in-process peers do.
//!
//! # Modules
//!
//! - [`config`] - TOML + environment configuration
//! - [`error`] - HTTP-facing error mapping
//! - [`handlers`] - Axum routes and shared state

pub mod config;
pub mod error;
pub mod handlers;
