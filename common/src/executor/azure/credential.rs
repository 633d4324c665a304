// Azure access token acquisition
//
// Client secret (OAuth2 client credentials) and managed identity (App Service
// identity endpoint or IMDS), wrapped by a cache that refreshes ahead of expiry.

use crate::errors::ExecutionError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

const REFRESH_MARGIN_SECONDS: i64 = 300;

/// A bearer token and the instant it stops being valid
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECONDS) >= self.expires_at
    }
}

/// TokenCredential produces access tokens for a scope
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, ExecutionError>;
}

/// Token endpoints disagree on whether numbers are JSON numbers or strings
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<Value>,
    #[serde(default)]
    expires_on: Option<Value>,
}

impl TokenResponse {
    fn into_access_token(self, now: DateTime<Utc>) -> Result<AccessToken, ExecutionError> {
        let expires_at = if let Some(on) = self.expires_on.as_ref().and_then(as_i64) {
            DateTime::<Utc>::from_timestamp(on, 0)
        } else if let Some(secs) = self.expires_in.as_ref().and_then(as_i64) {
            Duration::try_seconds(secs).and_then(|d| now.checked_add_signed(d))
        } else {
            None
        };

        let expires_at = expires_at.ok_or_else(|| {
            ExecutionError::AuthenticationFailed(
                "token response carries no usable expiry".to_string(),
            )
        })?;

        Ok(AccessToken {
            token: self.access_token,
            expires_at,
        })
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

async fn read_token_response(
    response: reqwest::Response,
    source: &str,
) -> Result<AccessToken, ExecutionError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ExecutionError::AuthenticationFailed(format!(
            "{} token request failed with status {}: {}",
            source, status, body
        )));
    }

    let token: TokenResponse = response.json().await.map_err(|e| {
        ExecutionError::AuthenticationFailed(format!(
            "Failed to parse {} token response: {}",
            source, e
        ))
    })?;
    token.into_access_token(Utc::now())
}

/// Service principal credential using the OAuth2 client credentials grant
pub struct ClientSecretCredential {
    client: Client,
    authority_host: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

impl ClientSecretCredential {
    pub fn new(
        client: Client,
        authority_host: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            authority_host: authority_host.into(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    #[instrument(skip(self), fields(client_id = %self.client_id))]
    async fn get_token(&self, scope: &str) -> Result<AccessToken, ExecutionError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];

        let response = self
            .client
            .post(self.token_url())
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                ExecutionError::AuthenticationFailed(format!("Token request failed: {}", e))
            })?;

        read_token_response(response, "client secret").await
    }
}

/// Where a managed identity token comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    /// App Service / Functions identity endpoint
    AppService { endpoint: String, header: String },
    /// Instance metadata service on VMs
    Imds { endpoint: String },
}

impl IdentitySource {
    /// App Service when `IDENTITY_ENDPOINT` and `IDENTITY_HEADER` are set, IMDS otherwise
    pub fn from_env() -> Self {
        match (
            std::env::var("IDENTITY_ENDPOINT"),
            std::env::var("IDENTITY_HEADER"),
        ) {
            (Ok(endpoint), Ok(header)) => IdentitySource::AppService { endpoint, header },
            _ => IdentitySource::Imds {
                endpoint: IMDS_ENDPOINT.to_string(),
            },
        }
    }
}

/// Managed identity credential, optionally for a user-assigned identity
pub struct ManagedIdentityCredential {
    client: Client,
    source: IdentitySource,
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    pub fn new(client: Client, source: IdentitySource, client_id: Option<String>) -> Self {
        Self {
            client,
            source,
            client_id,
        }
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    #[instrument(skip(self))]
    async fn get_token(&self, scope: &str) -> Result<AccessToken, ExecutionError> {
        // Identity endpoints take a resource, not a scope
        let resource = scope.trim_end_matches("/.default");

        let mut request = match &self.source {
            IdentitySource::AppService { endpoint, header } => self
                .client
                .get(endpoint)
                .query(&[("api-version", "2019-08-01"), ("resource", resource)])
                .header("X-IDENTITY-HEADER", header),
            IdentitySource::Imds { endpoint } => self
                .client
                .get(endpoint)
                .query(&[("api-version", "2018-02-01"), ("resource", resource)])
                .header("Metadata", "true"),
        };
        if let Some(client_id) = &self.client_id {
            request = request.query(&[("client_id", client_id.as_str())]);
        }

        let response = request.send().await.map_err(|e| {
            ExecutionError::AuthenticationFailed(format!("Managed identity request failed: {}", e))
        })?;

        read_token_response(response, "managed identity").await
    }
}

/// Caches the last token per credential and refreshes it five minutes early
pub struct CachedCredential {
    inner: Box<dyn TokenCredential>,
    cached: Mutex<Option<AccessToken>>,
}

impl CachedCredential {
    pub fn new(inner: Box<dyn TokenCredential>) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TokenCredential for CachedCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, ExecutionError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if !token.needs_refresh(Utc::now()) {
                return Ok(token.clone());
            }
            debug!("Access token close to expiry, refreshing");
        }

        let token = self.inner.get_token(scope).await?;
        info!(expires_at = %token.expires_at, "Acquired access token");
        *cached = Some(token.clone());
        Ok(token)
    }
}
