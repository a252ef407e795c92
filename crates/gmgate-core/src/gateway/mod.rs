//! Client for the game server's OpenCommand endpoint.
//!
//! This module provides the `Gateway` for delivering and redeeming
//! verification codes and running commands on the game server.
//!
//! Requests go through the `Transport` trait; `HttpTransport` is the
//! production implementation over reqwest.

pub mod actions;
pub mod client;
pub mod error;
pub mod types;

pub use actions::Gateway;
pub use client::HttpTransport;
pub use error::GatewayError;
pub use types::{Action, GatewayRequest, GatewayResponse, Transport};
