//! Gmail OAuth2 authentication
//!
//! Exchanges a long-lived refresh token for access tokens. The consent flow
//! that produces the refresh token happens elsewhere; this type only keeps a
//! valid access token around.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Mutex;

use crate::config::GmailCredentials;
use crate::error::GmailError;

/// Cached access token
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    #[allow(dead_code)]
    token_type: Option<String>,
}

/// OAuth2 token management for one Gmail account
pub struct GmailAuth {
    credentials: GmailCredentials,
    cached: Mutex<Option<CachedToken>>,
}

impl GmailAuth {
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Refresh this long before the token actually expires
    const EXPIRY_MARGIN_SECS: i64 = 300;

    pub fn new(credentials: GmailCredentials) -> Self {
        Self {
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// Get a valid access token, refreshing as needed
    pub fn get_access_token(&self, agent: &ureq::Agent) -> Result<String, GmailError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let token = self.refresh_access_token(agent)?;
        let expires_at = Utc::now() + Duration::seconds(token.expires_in.unwrap_or(3600));
        let mut cached = self.cached.lock().unwrap_or_else(|p| p.into_inner());
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }

    /// Drop the cached token so the next call refreshes
    pub fn invalidate(&self) {
        let mut cached = self.cached.lock().unwrap_or_else(|p| p.into_inner());
        *cached = None;
    }

    /// Check if a usable token is cached
    pub fn is_authenticated(&self) -> bool {
        self.cached_token().is_some()
    }

    fn cached_token(&self) -> Option<String> {
        let cached = self.cached.lock().unwrap_or_else(|p| p.into_inner());
        cached
            .as_ref()
            .filter(|t| t.expires_at > Utc::now() + Duration::seconds(Self::EXPIRY_MARGIN_SECS))
            .map(|t| t.access_token.clone())
    }

    /// Refresh an access token using the refresh token
    fn refresh_access_token(&self, agent: &ureq::Agent) -> Result<TokenResponse, GmailError> {
        let creds = &self.credentials;
        let mut response = agent
            .post(Self::TOKEN_URL)
            .send_form([
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
                ("refresh_token", creds.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .map_err(|e| match e {
                // Google answers a revoked or malformed grant with 400
                ureq::Error::StatusCode(code @ (400 | 401 | 403)) => {
                    GmailError::AuthOrRateLimit(format!("token refresh rejected: HTTP {}", code))
                }
                other => super::api_client::map_ureq_error(other),
            })?;

        response
            .body_mut()
            .read_json::<TokenResponse>()
            .map_err(|e| GmailError::Parse(format!("token response: {}", e)))
    }
}
