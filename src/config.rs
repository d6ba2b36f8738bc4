//! Server settings: config file, then environment, then command line.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

use crate::bridge::{BridgeOptions, DEFAULT_ALL_EVENTS_LIMIT};
use crate::lifecycle::{WarmupPolicy, DEFAULT_WARMUP_ATTEMPTS, DEFAULT_WARMUP_BACKOFF};

const APP_NAME: &str = "mailbridge";
const CONFIG_FILE: &str = "config.json";

pub const ENV_ACCOUNT: &str = "MAILBRIDGE_ACCOUNT";
pub const ENV_FIXTURE: &str = "MAILBRIDGE_FIXTURE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Stdio,
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Store used for root-level folder lookups and as the default
    /// free/busy address.
    pub account: Option<String>,
    pub transport: Transport,
    /// Listen address for the TCP transport.
    pub bind: String,
    pub warmup_attempts: u32,
    pub warmup_backoff_ms: u64,
    pub call_timeout_secs: u64,
    /// Cap on `list_calendar_events` with `all` set.
    pub all_events_limit: usize,
    /// JSON file seeding the sandbox mailbox.
    pub fixture: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            account: None,
            transport: Transport::Stdio,
            bind: "127.0.0.1:7878".to_string(),
            warmup_attempts: DEFAULT_WARMUP_ATTEMPTS,
            warmup_backoff_ms: DEFAULT_WARMUP_BACKOFF.as_millis() as u64,
            call_timeout_secs: 30,
            all_events_limit: DEFAULT_ALL_EVENTS_LIMIT,
            fixture: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the user's config directory.
    /// Returns defaults if the file doesn't exist or fails to parse.
    pub fn load() -> Self {
        match Self::try_load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    fn try_load() -> Result<Self> {
        let config_path = get_config_path()?;
        if !config_path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Overlay `MAILBRIDGE_ACCOUNT` and `MAILBRIDGE_FIXTURE`. Empty values
    /// are ignored.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(account) = var(ENV_ACCOUNT).filter(|v| !v.is_empty()) {
            self.account = Some(account);
        }
        if let Some(fixture) = var(ENV_FIXTURE).filter(|v| !v.is_empty()) {
            self.fixture = Some(PathBuf::from(fixture));
        }
    }

    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            account: self.account.clone(),
            all_events_limit: self.all_events_limit,
        }
    }

    pub fn warmup_policy(&self) -> WarmupPolicy {
        WarmupPolicy {
            attempts: self.warmup_attempts,
            backoff: Duration::from_millis(self.warmup_backoff_ms),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_files_keep_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"account": "work@example.com", "transport": "tcp"}}"#).unwrap();

        let config = ServerConfig::load_from(file.path()).unwrap();
        assert_eq!(config.account.as_deref(), Some("work@example.com"));
        assert_eq!(config.transport, Transport::Tcp);
        assert_eq!(config.warmup_attempts, 5);
        assert_eq!(config.warmup_policy().backoff, Duration::from_millis(500));
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn malformed_files_are_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(ServerConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = ServerConfig {
            account: Some("file@example.com".into()),
            ..Default::default()
        };
        config.apply_vars(|name| match name {
            ENV_ACCOUNT => Some("env@example.com".into()),
            ENV_FIXTURE => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.account.as_deref(), Some("env@example.com"));
        assert_eq!(config.fixture, None);
    }
}
