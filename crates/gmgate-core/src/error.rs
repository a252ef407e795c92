use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors surfaced by the command gate.
///
/// `Validation` and `Dangerous` are resolved locally and never reach the
/// gateway. `VerificationRequired` and `VerificationExpired` short-circuit
/// before the elevated credential is touched.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Invalid command: {0}")]
    Validation(String),

    #[error("Dangerous command rejected: {0}")]
    Dangerous(String),

    #[error("Target {0} is not verified - request a verification code first")]
    VerificationRequired(String),

    #[error("Verification for target {0} has expired - request a new code")]
    VerificationExpired(String),

    #[error("Verification code rejected: {0}")]
    CodeRejected(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Game server denied permission: {0}")]
    UpstreamPermissionDenied(String),

    #[error("Game server rejected command usage: {0}")]
    UpstreamUsage(String),

    #[error("Invalid account or password")]
    InvalidCredentials,

    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Account store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl GateError {
    /// Whether the caller should be prompted to (re-)verify the target.
    pub fn needs_verification(&self) -> bool {
        matches!(
            self,
            GateError::VerificationRequired(_) | GateError::VerificationExpired(_)
        )
    }
}

pub type GateResult<T> = std::result::Result<T, GateError>;
