use anyhow::{Context, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use keyring::Entry;
use rand::RngCore;

const SERVICE_NAME: &str = "gmgate";

/// Keychain account under which the elevated console token is kept.
const CONSOLE_TOKEN_ACCOUNT: &str = "console-token";

/// Hash an account password into a salted PHC string.
pub fn hash_credential(password: &str) -> Result<String> {
    let mut salt_raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_raw);
    let salt = SaltString::encode_b64(&salt_raw)
        .map_err(|e| anyhow::anyhow!("Failed to encode salt: {e}"))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash credential: {e}"))?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC string.
/// A malformed hash never matches.
pub fn verify_credential(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// The console token in the OS keychain.
pub struct CredentialStore;

impl CredentialStore {
    fn entry() -> Result<Entry> {
        Entry::new(SERVICE_NAME, CONSOLE_TOKEN_ACCOUNT).context("Failed to create keyring entry")
    }

    /// Store the console token in the OS keychain
    pub fn store(token: &str) -> Result<()> {
        Self::entry()?
            .set_password(token)
            .context("Failed to store console token in keychain")?;
        Ok(())
    }

    /// Retrieve the console token from the OS keychain
    pub fn get() -> Result<String> {
        Self::entry()?
            .get_password()
            .context("Failed to retrieve console token from keychain")
    }

    pub fn delete() -> Result<()> {
        Self::entry()?
            .delete_credential()
            .context("Failed to delete console token from keychain")?;
        Ok(())
    }

    pub fn has_token() -> bool {
        Self::entry().map(|e| e.get_password().is_ok()).unwrap_or(false)
    }
}
