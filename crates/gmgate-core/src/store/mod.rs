//! State storage for the gate.
//!
//! This module provides:
//! - `ExpiringMap`: concurrent map of expiring entries with lazy eviction
//! - `Clock`: injectable time source for expiry decisions
//! - `AccountStore`: account records (in-memory or JSON file)

pub mod accounts;
pub mod clock;
pub mod expiring;

pub use accounts::{Account, AccountStore, JsonAccountStore, MemoryAccountStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use expiring::{ExpiringMap, Expires, Lookup};
