//! OAuth2 client-credentials token cache for OpenSky, carried over in
//! semantics from `OpenSkySource._get_access_token` in
//! `original_source/tracking/adsb_tracker.py`.

use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;
use std::time::Instant;

use crate::error::AtcError;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

struct CachedToken {
    token: String,
    /// Instant the cached token should no longer be used — 60s before
    /// its actual expiry, per §4.3.
    refresh_at: Instant,
}

/// Caches an OAuth2 bearer token, refreshing it 60 seconds before expiry.
///
/// A 400 from the token endpoint is retried once with HTTP Basic auth
/// instead of form-encoded credentials, matching the original's fallback.
pub struct OAuthTokenCache {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
    disabled: Mutex<bool>,
}

impl OAuthTokenCache {
    pub fn new(client: Client, token_url: String, client_id: String, client_secret: String) -> Self {
        Self {
            client,
            token_url,
            client_id,
            client_secret,
            cached: Mutex::new(None),
            disabled: Mutex::new(false),
        }
    }

    /// Return a valid bearer token, refreshing if necessary. Returns `None`
    /// (anonymous access) if acquisition fails, or if a non-400 4xx
    /// previously disabled authenticated requests for this process.
    pub async fn token(&self) -> Option<String> {
        if *self.disabled.lock() {
            return None;
        }

        if let Some(cached) = self.cached.lock().as_ref() {
            if Instant::now() < cached.refresh_at {
                return Some(cached.token.clone());
            }
        }

        match self.fetch_token().await {
            Ok(response) => {
                let refresh_at = Instant::now()
                    + Duration::from_secs(response.expires_in).saturating_sub(Duration::from_secs(60));
                let token = response.access_token.clone();
                *self.cached.lock() = Some(CachedToken { token, refresh_at });
                Some(response.access_token)
            }
            Err(TokenError::HardFailure) => {
                *self.disabled.lock() = true;
                None
            }
            Err(TokenError::Transient(message)) => {
                warn!(%message, "OAuth token request failed, continuing anonymously this tick");
                None
            }
        }
    }

    async fn fetch_token(&self) -> std::result::Result<TokenResponse, TokenError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .timeout(Duration::from_secs(10))
            .form(&form)
            .send()
            .await
            .map_err(|e| TokenError::Transient(e.to_string()))?;

        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            return self.fetch_token_basic_auth_fallback().await;
        }

        if response.status().is_client_error() {
            let status = response.status();
            warn!(%status, "OAuth token endpoint returned non-400 4xx, disabling authenticated requests");
            return Err(TokenError::HardFailure);
        }

        let response = response
            .error_for_status()
            .map_err(|e| TokenError::Transient(e.to_string()))?;

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| TokenError::Transient(e.to_string()))
    }

    async fn fetch_token_basic_auth_fallback(&self) -> std::result::Result<TokenResponse, TokenError> {
        let form = [("grant_type", "client_credentials")];
        let response = self
            .client
            .post(&self.token_url)
            .timeout(Duration::from_secs(10))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| TokenError::Transient(e.to_string()))?;

        if response.status().is_client_error() {
            return Err(TokenError::HardFailure);
        }

        let response = response
            .error_for_status()
            .map_err(|e| TokenError::Transient(e.to_string()))?;

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| TokenError::Transient(e.to_string()))
    }
}

enum TokenError {
    /// A non-400 4xx: stop attempting authenticated requests until restart.
    HardFailure,
    /// Network error or other transient failure: retry next tick.
    Transient(String),
}

impl From<TokenError> for AtcError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::HardFailure => AtcError::OAuth("token endpoint rejected credentials".into()),
            TokenError::Transient(message) => AtcError::OAuth(message),
        }
    }
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::HardFailure => write!(f, "token endpoint rejected credentials"),
            TokenError::Transient(m) => write!(f, "{m}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_window_is_60s_before_expiry() {
        let expires_in = Duration::from_secs(3600);
        let refresh_in = expires_in.saturating_sub(Duration::from_secs(60));
        assert_eq!(refresh_in, Duration::from_secs(3540));
    }

    #[test]
    fn short_lived_token_refresh_window_does_not_underflow() {
        let expires_in = Duration::from_secs(30);
        let refresh_in = expires_in.saturating_sub(Duration::from_secs(60));
        assert_eq!(refresh_in, Duration::ZERO);
    }
}
