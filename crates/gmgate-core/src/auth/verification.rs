//! Per-target verification state.
//!
//! A record moves `absent -> pending -> verified` and is dropped once its
//! window lapses. Expiry is checked on every read; the periodic sweep only
//! bounds memory.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::command::TargetId;
use crate::error::{GateError, GateResult};
use crate::gateway::{Gateway, GatewayError};
use crate::store::{Clock, ExpiringMap, Expires, Lookup};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRecord {
    pub target: String,
    /// Opaque token returned by the game server when the code was delivered.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub verified: bool,
}

impl Expires for VerificationRecord {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl VerificationRecord {
    /// Usable for authorization: redeemed and still inside its window.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.verified && !self.is_expired_at(now)
    }
}

/// Where a target currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Unverified,
    Pending { expires_at: DateTime<Utc> },
    Verified { expires_at: DateTime<Utc> },
}

pub struct VerificationManager {
    records: ExpiringMap<String, VerificationRecord>,
    gateway: Gateway,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl VerificationManager {
    pub fn new(gateway: Gateway, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            records: ExpiringMap::new(),
            gateway,
            clock,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> GateResult<DateTime<Utc>> {
        now.checked_add_signed(self.window)
            .ok_or_else(|| GateError::Config("verification window is too large".to_string()))
    }

    /// Ask the game server to deliver a fresh code to `target`.
    ///
    /// Any earlier record for the target is discarded first, so a failed
    /// delivery leaves nothing behind. A window too large to add to the
    /// current time fails before anything is sent.
    pub async fn send_code(&self, target: &TargetId) -> GateResult<DateTime<Utc>> {
        self.expiry_from(self.clock.now())?;

        let key = target.as_str();
        if self.records.remove(key).await.is_some() {
            debug!(target_id = %target, "Replacing earlier verification record");
        }

        let token = match self.gateway.deliver_code(target).await {
            Ok(token) => token,
            Err(e) => {
                warn!(target_id = %target, error = %e, "Code delivery failed");
                return Err(GateError::Gateway(e));
            }
        };

        let expires_at = self.expiry_from(self.clock.now())?;
        self.records
            .insert(
                key.to_string(),
                VerificationRecord {
                    target: key.to_string(),
                    token,
                    expires_at,
                    verified: false,
                },
            )
            .await;
        info!(target_id = %target, %expires_at, "Verification pending");
        Ok(expires_at)
    }

    /// Redeem `code` for the pending record on `target`.
    ///
    /// Re-verifying a record that is already verified succeeds again. A code
    /// the game server rejects leaves the record pending.
    pub async fn verify_code(&self, target: &TargetId, code: &str) -> GateResult<()> {
        let key = target.as_str();
        let record = match self.records.lookup(key, self.clock.now()).await {
            Lookup::Live(record) => record,
            Lookup::Missing => return Err(GateError::VerificationRequired(key.to_string())),
            Lookup::Expired => {
                debug!(target_id = %target, "Verification record expired before redemption");
                return Err(GateError::VerificationExpired(key.to_string()));
            }
        };

        match self.gateway.redeem_code(&record.token, code).await {
            Ok(_) => {}
            Err(GatewayError::Rejected { message, .. }) => {
                info!(target_id = %target, "Verification code rejected");
                return Err(GateError::CodeRejected(message));
            }
            Err(e) => return Err(GateError::Gateway(e)),
        }

        // Only flip the record that was redeemed; a resend in the meantime
        // carries a different token.
        let flipped = self
            .records
            .modify(key, self.clock.now(), |current| {
                if current.token == record.token {
                    current.verified = true;
                    true
                } else {
                    false
                }
            })
            .await;

        match flipped {
            Some(true) => {
                info!(target_id = %target, "Target verified");
                Ok(())
            }
            Some(false) => Err(GateError::VerificationRequired(key.to_string())),
            None => Err(GateError::VerificationExpired(key.to_string())),
        }
    }

    pub async fn is_verified(&self, target: &str) -> bool {
        let now = self.clock.now();
        self.records
            .get(target, now)
            .await
            .is_some_and(|r| r.is_valid_at(now))
    }

    /// The delivered token, if the target is verified and unexpired.
    pub async fn verified_token(&self, target: &str) -> Option<String> {
        let now = self.clock.now();
        self.records
            .get(target, now)
            .await
            .filter(|r| r.is_valid_at(now))
            .map(|r| r.token)
    }

    pub async fn status(&self, target: &str) -> VerificationStatus {
        match self.records.get(target, self.clock.now()).await {
            None => VerificationStatus::Unverified,
            Some(r) if r.verified => VerificationStatus::Verified {
                expires_at: r.expires_at,
            },
            Some(r) => VerificationStatus::Pending {
                expires_at: r.expires_at,
            },
        }
    }

    /// Ok if `target` is verified and unexpired. A lapsed record is
    /// reported as expired, anything else as unverified.
    pub async fn authorize(&self, target: &str) -> GateResult<()> {
        let now = self.clock.now();
        match self.records.lookup(target, now).await {
            Lookup::Live(r) if r.is_valid_at(now) => Ok(()),
            Lookup::Expired => Err(GateError::VerificationExpired(target.to_string())),
            _ => Err(GateError::VerificationRequired(target.to_string())),
        }
    }

    /// Drop every lapsed record. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        self.records.sweep(self.clock.now()).await
    }

    /// Records currently held, lapsed ones included.
    pub async fn tracked(&self) -> usize {
        self.records.len().await
    }
}
