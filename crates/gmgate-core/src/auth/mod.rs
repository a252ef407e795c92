//! Authorization state.
//!
//! This module provides:
//! - `verification`: short-lived per-target verification records
//! - `session`: account sessions and the permanent target allowlist
//! - `credentials`: password hashing and keychain storage for the console token

pub mod credentials;
pub mod session;
pub mod verification;

pub use credentials::{hash_credential, verify_credential, CredentialStore};
pub use session::{Session, SessionManager};
pub use verification::{VerificationManager, VerificationRecord, VerificationStatus};
