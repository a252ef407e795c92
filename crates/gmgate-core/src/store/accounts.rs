//! Account record storage.
//!
//! The account store is an external collaborator: anything that can load,
//! create and atomically update an account record will do. Two implementations
//! are provided, an in-memory map and a single JSON file.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Account file name in the data directory
const ACCOUNTS_FILE: &str = "accounts.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    /// PHC-format credential hash.
    pub credential_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    /// Targets this account may act on without a fresh verification.
    #[serde(default)]
    pub verified_targets: BTreeSet<String>,
}

impl Account {
    pub fn new(id: impl Into<String>, credential_hash: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            credential_hash: credential_hash.into(),
            created_at: Utc::now(),
            last_login_at: None,
            verified_targets: BTreeSet::new(),
        }
    }

    pub fn has_verified_target(&self, target: &str) -> bool {
        self.verified_targets.contains(target)
    }
}

pub trait AccountStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<Account>>;

    /// Insert a new account. Returns `false` if the id is already taken.
    fn insert_new(&self, account: Account) -> Result<bool>;

    /// Apply `f` to the stored account under the store's lock.
    /// Returns `false` if the account does not exist.
    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Account)) -> Result<bool>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<String, Account>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("Account store lock poisoned")
}

impl AccountStore for MemoryAccountStore {
    fn get(&self, id: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        Ok(accounts.get(id).cloned())
    }

    fn insert_new(&self, account: Account) -> Result<bool> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        if accounts.contains_key(&account.id) {
            return Ok(false);
        }
        accounts.insert(account.id.clone(), account);
        Ok(true)
    }

    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Account)) -> Result<bool> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        match accounts.get_mut(id) {
            Some(account) => {
                f(account);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ============================================================================
// JSON file store
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountFile {
    #[serde(default)]
    accounts: Vec<Account>,
}

/// Accounts persisted as a single pretty-printed JSON file.
/// Every write rewrites the whole file while holding the store lock.
pub struct JsonAccountStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonAccountStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create account directory: {}", parent.display()))?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Store located in `dir` under the default file name.
    pub fn in_dir(dir: &Path) -> Result<Self> {
        Self::new(dir.join(ACCOUNTS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<AccountFile> {
        if !self.path.exists() {
            return Ok(AccountFile::default());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read account file: {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse account file: {}", self.path.display()))
    }

    fn save(&self, file: &AccountFile) -> Result<()> {
        let contents = serde_json::to_string_pretty(file)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write account file: {}", self.path.display()))?;
        debug!(path = %self.path.display(), accounts = file.accounts.len(), "Saved account file");
        Ok(())
    }
}

impl AccountStore for JsonAccountStore {
    fn get(&self, id: &str) -> Result<Option<Account>> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        Ok(self.load()?.accounts.into_iter().find(|a| a.id == id))
    }

    fn insert_new(&self, account: Account) -> Result<bool> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut file = self.load()?;
        if file.accounts.iter().any(|a| a.id == account.id) {
            return Ok(false);
        }
        file.accounts.push(account);
        self.save(&file)?;
        Ok(true)
    }

    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Account)) -> Result<bool> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut file = self.load()?;
        let Some(account) = file.accounts.iter_mut().find(|a| a.id == id) else {
            return Ok(false);
        };
        f(account);
        self.save(&file)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_store(store: &dyn AccountStore) {
        assert!(store.get("alice").unwrap().is_none());
        assert!(store.insert_new(Account::new("alice", "hash")).unwrap());
        assert!(!store.insert_new(Account::new("alice", "other")).unwrap());

        let updated = store
            .update("alice", &mut |a| {
                a.verified_targets.insert("12345".to_string());
            })
            .unwrap();
        assert!(updated);
        assert!(!store.update("bob", &mut |_| {}).unwrap());

        let alice = store.get("alice").unwrap().unwrap();
        assert_eq!(alice.credential_hash, "hash");
        assert!(alice.has_verified_target("12345"));
        assert!(!alice.has_verified_target("99999"));
    }

    #[test]
    fn test_memory_store() {
        exercise_store(&MemoryAccountStore::new());
    }

    #[test]
    fn test_json_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonAccountStore::in_dir(dir.path()).unwrap();
        exercise_store(&store);

        // A fresh handle on the same file sees the same data.
        let reopened = JsonAccountStore::in_dir(dir.path()).unwrap();
        let alice = reopened.get("alice").unwrap().unwrap();
        assert!(alice.has_verified_target("12345"));
        assert_eq!(reopened.path(), dir.path().join(ACCOUNTS_FILE));
    }

    #[test]
    fn test_json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ACCOUNTS_FILE), "not json").unwrap();
        let store = JsonAccountStore::in_dir(dir.path()).unwrap();
        assert!(store.get("alice").is_err());
    }
}
