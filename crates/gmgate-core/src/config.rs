//! Application configuration management.
//!
//! This module handles loading and saving the gate configuration: where the
//! game server's command endpoint lives, the elevated console credential, and
//! the verification and session validity windows.
//!
//! Configuration is stored at `~/.config/gmgate/config.json`. Environment
//! variables override file values.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
const APP_NAME: &str = "gmgate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Account file name in the data directory
const ACCOUNTS_FILE: &str = "accounts.json";

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:443";
const DEFAULT_API_PATH: &str = "/opencommand/api";

/// Gateway request timeout in milliseconds.
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Verification codes are valid for 5 minutes.
const DEFAULT_VERIFICATION_WINDOW_SECS: u64 = 300;

/// Expired verification records and sessions are swept once a minute.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Account sessions last a day.
const DEFAULT_SESSION_VALIDITY_HOURS: u64 = 24;

pub const ENV_SERVER_URL: &str = "GMGATE_SERVER_URL";
pub const ENV_API_PATH: &str = "GMGATE_API_PATH";
pub const ENV_CONSOLE_TOKEN: &str = "GMGATE_CONSOLE_TOKEN";
pub const ENV_TIMEOUT_MS: &str = "GMGATE_TIMEOUT_MS";

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub server_url: String,
    pub api_path: String,
    /// Server selector sent with every request.
    pub server: String,
    /// Elevated credential. Never shown to callers.
    pub console_token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_path: DEFAULT_API_PATH.to_string(),
            server: String::new(),
            console_token: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("server_url", &self.server_url)
            .field("api_path", &self.api_path)
            .field("server", &self.server)
            .field("console_token", &self.console_token.as_ref().map(|_| "***"))
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl GatewayConfig {
    /// Base URL joined with the API path by exactly one `/`.
    pub fn full_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        let path = self.api_path.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, path)
        }
    }

    pub fn timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.timeout_ms)
    }

    /// The elevated credential, if one is configured and non-blank.
    pub fn console_token(&self) -> Option<&str> {
        self.console_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerificationConfig {
    pub window_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_VERIFICATION_WINDOW_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl VerificationConfig {
    /// Saturates at `Duration::MAX` for values chrono cannot represent.
    pub fn window(&self) -> Duration {
        i64::try_from(self.window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }

    pub fn sweep_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub validity_hours: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            validity_hours: DEFAULT_SESSION_VALIDITY_HOURS,
        }
    }
}

impl SessionConfig {
    /// Saturates at `Duration::MAX` for values chrono cannot represent.
    pub fn validity(&self) -> Duration {
        i64::try_from(self.validity_hours)
            .ok()
            .and_then(Duration::try_hours)
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub verification: VerificationConfig,
    pub session: SessionConfig,
    /// Overrides the default account file location.
    pub accounts_file: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Self = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config
                .validate()
                .with_context(|| format!("Invalid config file: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject windows too large to compute an expiry from the current time.
    pub fn validate(&self) -> Result<()> {
        let now = Utc::now();
        if now.checked_add_signed(self.verification.window()).is_none() {
            anyhow::bail!(
                "verification.window_secs {} is too large",
                self.verification.window_secs
            );
        }
        if now.checked_add_signed(self.session.validity()).is_none() {
            anyhow::bail!(
                "session.validity_hours {} is too large",
                self.session.validity_hours
            );
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn accounts_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.accounts_file {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(ACCOUNTS_FILE))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_SERVER_URL) {
            self.gateway.server_url = url;
        }
        if let Some(path) = get(ENV_API_PATH) {
            self.gateway.api_path = path;
        }
        if let Some(token) = get(ENV_CONSOLE_TOKEN) {
            self.gateway.console_token = Some(token);
        }
        if let Some(timeout) = get(ENV_TIMEOUT_MS) {
            match timeout.trim().parse() {
                Ok(ms) => self.gateway.timeout_ms = ms,
                Err(_) => tracing::warn!(value = %timeout, "Ignoring invalid {}", ENV_TIMEOUT_MS),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.full_url(), "http://127.0.0.1:443/opencommand/api");
        assert_eq!(config.verification.window(), Duration::minutes(5));
        assert_eq!(config.session.validity(), Duration::hours(24));
        assert!(config.gateway.console_token().is_none());
    }

    #[test]
    fn test_full_url_joins_with_single_slash() {
        let mut gw = GatewayConfig {
            server_url: "https://gc.example.com/".to_string(),
            api_path: "/opencommand/api".to_string(),
            ..GatewayConfig::default()
        };
        assert_eq!(gw.full_url(), "https://gc.example.com/opencommand/api");
        gw.api_path = "opencommand/api".to_string();
        assert_eq!(gw.full_url(), "https://gc.example.com/opencommand/api");
        gw.api_path = String::new();
        assert_eq!(gw.full_url(), "https://gc.example.com");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"gateway": {"server_url": "http://10.0.0.2:8080"}}"#).unwrap();
        assert_eq!(config.gateway.server_url, "http://10.0.0.2:8080");
        assert_eq!(config.gateway.api_path, DEFAULT_API_PATH);
        assert_eq!(config.gateway.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.verification, VerificationConfig::default());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_SERVER_URL, "http://gc:443"),
            (ENV_CONSOLE_TOKEN, "console-secret"),
            (ENV_TIMEOUT_MS, "not-a-number"),
            (ENV_API_PATH, "  "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.gateway.server_url, "http://gc:443");
        assert_eq!(config.gateway.console_token(), Some("console-secret"));
        assert_eq!(config.gateway.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.gateway.api_path, DEFAULT_API_PATH);
    }

    #[test]
    fn test_blank_console_token_is_absent() {
        let gw = GatewayConfig {
            console_token: Some("   ".to_string()),
            ..GatewayConfig::default()
        };
        assert!(gw.console_token().is_none());
    }

    #[test]
    fn test_debug_redacts_console_token() {
        let gw = GatewayConfig {
            console_token: Some("console-secret".to_string()),
            ..GatewayConfig::default()
        };
        let debug = format!("{:?}", gw);
        assert!(!debug.contains("console-secret"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let mut config = Config::default();
        config.gateway.server = "gc-1".to_string();
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_oversized_windows_saturate() {
        let verification = VerificationConfig {
            window_secs: u64::MAX,
            ..VerificationConfig::default()
        };
        assert_eq!(verification.window(), Duration::MAX);
        let session = SessionConfig {
            validity_hours: u64::MAX,
        };
        assert_eq!(session.validity(), Duration::MAX);
        let session = SessionConfig {
            validity_hours: 1_000_000_000_000,
        };
        assert_eq!(session.validity(), Duration::MAX);
    }

    #[test]
    fn test_load_rejects_unrepresentable_validity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"session": {"validity_hours": 1000000000000}}"#).unwrap();
        assert!(Config::load_from(&path).is_err());

        std::fs::write(&path, r#"{"verification": {"window_secs": 18446744073709551615}}"#)
            .unwrap();
        assert!(Config::load_from(&path).is_err());

        assert!(Config::default().validate().is_ok());
    }
}
