//! Front-end configuration.
//!
//! Read from `<config dir>/mailbucket/config.toml` when present. Every field
//! is optional; `MAILBUCKET_API_URL` and `MAILBUCKET_STATE_FILE` override the
//! file.

use crate::{Client, Error, FileStore, InboxOptions, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_URL_ENV: &str = "MAILBUCKET_API_URL";
pub const STATE_FILE_ENV: &str = "MAILBUCKET_STATE_FILE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend base URL, without the `/api/v1` prefix.
    pub api_url: String,
    /// Seconds between auto-refreshes.
    pub refresh_interval_secs: u64,
    /// Page size of inbox fetches.
    pub per_page: u32,
    /// Where the active address is kept. Defaults to the user data dir.
    pub state_file: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000".to_string(),
            refresh_interval_secs: crate::inbox::AUTO_REFRESH_INTERVAL.as_secs(),
            per_page: crate::inbox::DEFAULT_PER_PAGE,
            state_file: None,
            timeout_secs: Some(30),
            user_agent: None,
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mailbucket").join("config.toml"))
}

impl Config {
    /// Load the default config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse `path`; a missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Config(format!("{}: {e}", path.display()))),
        }
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(API_URL_ENV).filter(|v| !v.is_empty()) {
            self.api_url = url;
        }
        if let Some(path) = var(STATE_FILE_ENV).filter(|v| !v.is_empty()) {
            self.state_file = Some(PathBuf::from(path));
        }
    }

    pub fn client(&self) -> Result<Client> {
        let mut builder = Client::builder().base_url(&self.api_url);
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(agent);
        }
        builder.build()
    }

    pub fn store(&self) -> FileStore {
        FileStore::new(
            self.state_file
                .clone()
                .unwrap_or_else(FileStore::default_path),
        )
    }

    pub fn inbox_options(&self) -> InboxOptions {
        InboxOptions {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs.max(1)),
            per_page: self.per_page.max(1),
        }
    }
}
