//! wearhook - HTTP flow correlation for a paired wearable companion app
//!
//! Pairs the request and response messages emitted by an in-process
//! capture script, dispatches completed flows to per-route observers,
//! and decrypts captured RC4 payloads.

pub mod app;
pub mod capture;
pub mod crypto;
mod error;

pub use error::*;
