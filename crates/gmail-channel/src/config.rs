//! Configuration loading for the Gmail channel
//!
//! Supports loading OAuth credentials from (in order of priority):
//! 1. Compile-time embedded credentials (for production builds)
//! 2. JSON file (Google Cloud Console format) plus `GMAIL_REFRESH_TOKEN`
//! 3. Runtime environment variables (fallback)
//!
//! Account and channel settings live in `relay.json` in the same directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::{Account, ChannelDefaults};

/// Credentials filename in the config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Account and channel settings filename in the config directory
pub const RELAY_CONFIG_FILE: &str = "relay.json";

const REFRESH_TOKEN_ENV: &str = "GMAIL_REFRESH_TOKEN";

/// OAuth credentials for Gmail API access
#[derive(Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for GmailCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Google Cloud Console credential file format (installed app)
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
    /// Not part of Google's format; accepted so one file can hold everything
    refresh_token: Option<String>,
}

impl GmailCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded credentials (for production builds)
    /// 2. JSON file (<config dir>/google-credentials.json) plus `GMAIL_REFRESH_TOKEN`
    /// 3. Runtime environment variables
    pub fn load() -> Result<Self> {
        // Try compile-time embedded credentials first (production builds)
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        // Try default config file
        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds, std::env::var(REFRESH_TOKEN_ENV).ok());
        }

        // Fall back to runtime environment variables
        Self::from_env()
    }

    /// Load credentials embedded at compile time via environment variables.
    /// Build with: GOOGLE_CLIENT_ID=xxx GOOGLE_CLIENT_SECRET=yyy GMAIL_REFRESH_TOKEN=zzz cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;
        let refresh_token = option_env!("GMAIL_REFRESH_TOKEN")?;

        // Only return if all are non-empty
        if client_id.is_empty() || client_secret.is_empty() || refresh_token.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            refresh_token: refresh_token.to_string(),
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds, std::env::var(REFRESH_TOKEN_ENV).ok())
    }

    /// Parse credentials from a GoogleCredentialFile
    fn from_credential_file(
        creds: GoogleCredentialFile,
        refresh_token: Option<String>,
    ) -> Result<Self> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        let refresh_token = refresh_token
            .or(installed.refresh_token)
            .filter(|t| !t.trim().is_empty())
            .with_context(|| format!("{} not set and no refresh_token in credentials file", REFRESH_TOKEN_ENV))?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
            refresh_token,
        })
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str, refresh_token: Option<String>) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds, refresh_token)
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;
        let refresh_token = std::env::var(REFRESH_TOKEN_ENV)
            .with_context(|| format!("{} environment variable not set", REFRESH_TOKEN_ENV))?;

        Ok(Self {
            client_id,
            client_secret,
            refresh_token,
        })
    }

    /// Get the default credentials file path (<config dir>/google-credentials.json)
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }

    /// Check if credentials are available (compile-time, file, or env vars)
    pub fn is_available() -> bool {
        Self::load().is_ok()
    }
}

fn default_max_concurrent_dispatch() -> usize {
    5
}

/// Contents of `relay.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub defaults: ChannelDefaults,
    /// Dispatch slots shared by every account
    #[serde(default = "default_max_concurrent_dispatch")]
    pub max_concurrent_dispatch: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            defaults: ChannelDefaults::default(),
            max_concurrent_dispatch: default_max_concurrent_dispatch(),
        }
    }
}

impl RelayConfig {
    /// Load `relay.json` from the config directory
    pub fn load() -> Result<Self> {
        if !config::config_exists(RELAY_CONFIG_FILE) {
            anyhow::bail!(
                "{} not found in {}",
                RELAY_CONFIG_FILE,
                config::config_dir()
                    .map(|d| d.display().to_string())
                    .unwrap_or_else(|| "<no config dir>".to_string())
            );
        }
        config::load_json(RELAY_CONFIG_FILE)
    }

    /// Load from an explicit path
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// The account entry for `email`, matched case-insensitively
    pub fn account(&self, email: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.email.eq_ignore_ascii_case(email))
    }

    /// Root directory for downloaded attachments
    pub fn attachments_root(&self) -> PathBuf {
        self.defaults
            .attachments_dir
            .clone()
            .or_else(|| config::state_dir().map(|d| d.join("attachments")))
            .unwrap_or_else(|| std::env::temp_dir().join("gmail-channel").join("attachments"))
    }
}
