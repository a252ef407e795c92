//! gmgate-core - authorization and normalization for remote GM commands.
//!
//! Operators run administrative commands on a game server on behalf of an
//! in-game target without ever seeing the server's elevated credential.
//! Commands are screened, validated and rewritten to carry exactly one
//! target marker; execution is gated on a short-lived per-target
//! verification or on an account's permanent allowlist.

pub mod auth;
pub mod command;
pub mod config;
pub mod error;
pub mod gateway;
pub mod service;
pub mod store;

pub use config::Config;
pub use error::{GateError, GateResult};
pub use service::{classify_upstream, ExecutionOutcome, GateService, Sweeper};
