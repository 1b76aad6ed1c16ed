//! # graphd server
//!
//! TCP transport for [`graphd_core::InferenceService`] and a matching async
//! client.

pub mod client;
pub mod server;

pub use client::GraphClient;
pub use server::GraphServer;
