//! Account sessions and the permanent per-account target allowlist.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};

use super::credentials::{hash_credential, verify_credential};
use crate::error::{GateError, GateResult};
use crate::store::{Account, AccountStore, Clock, ExpiringMap, Expires};

/// Session token length in characters.
const TOKEN_LENGTH: usize = 48;

const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Expires for Session {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Hash verified against when the account does not exist, so an unknown
/// id costs the same Argon2 work as a wrong password.
static DUMMY_CREDENTIAL_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_credential(&generate_token()).ok());

fn join_failed(err: tokio::task::JoinError) -> GateError {
    GateError::Store(anyhow::anyhow!("Credential task failed: {}", err))
}

fn unknown_account(account_id: &str) -> GateError {
    GateError::Store(anyhow::anyhow!("Unknown account: {}", account_id))
}

pub struct SessionManager {
    sessions: ExpiringMap<String, Session>,
    accounts: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    validity: Duration,
}

impl SessionManager {
    pub fn new(accounts: Arc<dyn AccountStore>, clock: Arc<dyn Clock>, validity: Duration) -> Self {
        Self {
            sessions: ExpiringMap::new(),
            accounts,
            clock,
            validity,
        }
    }

    /// Create an account. The id is trimmed; the password is stored hashed.
    pub async fn register(&self, account_id: &str, password: &str) -> GateResult<()> {
        let account_id = account_id.trim();
        if account_id.is_empty() {
            return Err(GateError::Registration("account id cannot be empty".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(GateError::Registration(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }

        let credential_hash = tokio::task::spawn_blocking({
            let password = password.to_string();
            move || hash_credential(&password)
        })
        .await
        .map_err(join_failed)??;

        let mut account = Account::new(account_id, credential_hash);
        account.created_at = self.clock.now();
        if !self.accounts.insert_new(account)? {
            return Err(GateError::Registration(format!(
                "account {} already exists",
                account_id
            )));
        }
        info!(account = account_id, "Account registered");
        Ok(())
    }

    /// Authenticate and issue a new session.
    ///
    /// Unknown accounts and wrong passwords fail identically.
    pub async fn login(&self, account_id: &str, password: &str) -> GateResult<Session> {
        let account_id = account_id.trim();
        let account = self.accounts.get(account_id)?;
        let stored_hash = match &account {
            Some(a) => a.credential_hash.clone(),
            None => DUMMY_CREDENTIAL_HASH.clone().unwrap_or_default(),
        };
        let verified = tokio::task::spawn_blocking({
            let password = password.to_string();
            move || verify_credential(&password, &stored_hash)
        })
        .await
        .map_err(join_failed)?;

        let account = match account {
            Some(a) if verified => a,
            _ => {
                debug!(account = account_id, "Login failed");
                return Err(GateError::InvalidCredentials);
            }
        };

        let now = self.clock.now();
        let expires_at = now.checked_add_signed(self.validity).ok_or_else(|| {
            GateError::Config("session validity is too large".to_string())
        })?;
        self.accounts
            .update(&account.id, &mut |a: &mut Account| a.last_login_at = Some(now))?;

        let session = Session {
            token: generate_token(),
            account_id: account.id,
            created_at: now,
            expires_at,
        };
        self.sessions
            .insert(session.token.clone(), session.clone())
            .await;
        info!(account = %session.account_id, expires_at = %session.expires_at, "Session created");
        Ok(session)
    }

    /// Owning account of a live session.
    pub async fn validate(&self, token: &str) -> Option<String> {
        self.sessions
            .get(token, self.clock.now())
            .await
            .map(|s| s.account_id)
    }

    pub async fn logout(&self, token: &str) {
        if self.sessions.remove(token).await.is_some() {
            debug!("Session closed");
        }
    }

    /// The account behind a live session.
    pub async fn account_for(&self, token: &str) -> GateResult<Option<Account>> {
        match self.validate(token).await {
            Some(id) => Ok(self.accounts.get(&id)?),
            None => Ok(None),
        }
    }

    pub fn grant_permanent_verification(&self, account_id: &str, target: &str) -> GateResult<()> {
        let found = self.accounts.update(account_id, &mut |a: &mut Account| {
            a.verified_targets.insert(target.to_string());
        })?;
        if !found {
            return Err(unknown_account(account_id));
        }
        info!(account = account_id, target_id = target, "Target added to allowlist");
        Ok(())
    }

    pub fn revoke_permanent_verification(&self, account_id: &str, target: &str) -> GateResult<()> {
        let found = self.accounts.update(account_id, &mut |a: &mut Account| {
            a.verified_targets.remove(target);
        })?;
        if !found {
            return Err(unknown_account(account_id));
        }
        info!(account = account_id, target_id = target, "Target removed from allowlist");
        Ok(())
    }

    pub fn is_permanently_verified(&self, account_id: &str, target: &str) -> GateResult<bool> {
        Ok(self
            .accounts
            .get(account_id)?
            .is_some_and(|a| a.has_verified_target(target)))
    }

    /// Whether a live session's account has `target` on its allowlist.
    pub async fn is_target_allowed(&self, token: &str, target: &str) -> GateResult<bool> {
        Ok(self
            .account_for(token)
            .await?
            .is_some_and(|a| a.has_verified_target(target)))
    }

    /// Drop every lapsed session. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        self.sessions.sweep(self.clock.now()).await
    }

    /// Sessions currently held, lapsed ones included.
    pub async fn tracked(&self) -> usize {
        self.sessions.len().await
    }
}
