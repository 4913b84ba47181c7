//! Push provider credentials.
//!
//! A service account signs a short JWT assertion that is exchanged for an
//! OAuth access token. [`CredentialCache`] keeps the last token and hands it
//! out until it is within [`REFRESH_SKEW_SECS`] of expiry.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use dentease_common::gateway::GatewayError;

pub const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for the signed assertion.
pub const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens this close to expiry are refreshed before use.
pub const REFRESH_SKEW_SECS: i64 = 300;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a service-account JSON file the sender needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

impl ServiceAccount {
    pub fn from_json(json: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(json)
            .map_err(|e| GatewayError::Config(format!("Invalid service account JSON: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!(
                "Cannot read service account {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    /// Sign the JWT-bearer assertion for the token exchange.
    pub fn assertion(&self, issued_at: i64) -> Result<String, GatewayError> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            sub: &self.client_email,
            scope: MESSAGING_SCOPE,
            aud: &self.token_uri,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };

        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| GatewayError::Credential(format!("Invalid private key: {}", e)))?;

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| GatewayError::Credential(format!("Failed to sign assertion: {}", e)))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// A freshly issued access token.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    pub token: String,
    /// Seconds until expiry, as reported by the issuer.
    pub expires_in: i64,
}

/// Source of new access tokens.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self) -> Result<AccessToken, GatewayError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// OAuth JWT-bearer exchange against the service account's token URI.
pub struct ServiceAccountExchange {
    account: ServiceAccount,
    client: reqwest::Client,
}

impl ServiceAccountExchange {
    pub fn new(account: ServiceAccount, client: reqwest::Client) -> Self {
        Self { account, client }
    }
}

#[async_trait]
impl TokenExchange for ServiceAccountExchange {
    async fn exchange(&self) -> Result<AccessToken, GatewayError> {
        let assertion = self.account.assertion(Utc::now().timestamp())?;

        let response = self
            .client
            .post(&self.account.token_uri)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("Token exchange failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Credential(format!(
                "Token exchange rejected with status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Credential(format!("Malformed token response: {}", e)))?;

        tracing::debug!(client_email = %self.account.client_email, "Obtained push access token");

        Ok(AccessToken {
            token: token.access_token,
            expires_in: token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS),
        })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at - REFRESH_SKEW_SECS > now
    }
}

/// Short-lived cache of the provider bearer token.
///
/// Losing the cache only costs an extra exchange.
pub struct CredentialCache {
    exchange: Box<dyn TokenExchange>,
    cached: Mutex<Option<CachedToken>>,
}

impl CredentialCache {
    pub fn new(exchange: impl TokenExchange + 'static) -> Self {
        Self {
            exchange: Box::new(exchange),
            cached: Mutex::new(None),
        }
    }

    /// Current token, refreshed when missing or near expiry.
    pub async fn get_valid_token(&self) -> Result<String, GatewayError> {
        // Held across the exchange so concurrent callers share one refresh.
        let mut cached = self.cached.lock().await;
        let now = Utc::now().timestamp();

        if let Some(entry) = cached.as_ref()
            && entry.is_fresh(now)
        {
            return Ok(entry.token.clone());
        }

        let fresh = self.exchange.exchange().await?;
        *cached = Some(CachedToken {
            token: fresh.token.clone(),
            expires_at: now + fresh.expires_in,
        });
        Ok(fresh.token)
    }

    /// Drop the cached token, e.g. after the provider rejected it.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}
