//! Source credentials and OAuth token refresh
//!
//! Credentials expiring within [`REFRESH_WINDOW_SECS`] are refreshed before
//! use. A refreshed token is saved to the [`CredentialStore`] before it is
//! handed to the adapter, so a later call never refreshes again for the same
//! grant.

use crate::adapters::http::HttpClient;
use crate::error::SyncError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

pub const REFRESH_WINDOW_SECS: i64 = 60;

/// Stored tokens for one `credentials_ref`
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    /// No expiry means the token does not expire
    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at - now <= window)
    }
}

/// Source credentials collaborator
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, credentials_ref: &str) -> Result<Option<Credentials>, SyncError>;
    async fn save(&self, credentials_ref: &str, credentials: &Credentials) -> Result<(), SyncError>;
}

/// OAuth client registration for a token endpoint
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Loads tokens and performs the refresh-token grant when needed
pub struct TokenRefresher {
    store: Arc<dyn CredentialStore>,
    http: Arc<HttpClient>,
    oauth: Option<OAuthClient>,
}

impl TokenRefresher {
    pub fn new(store: Arc<dyn CredentialStore>, http: Arc<HttpClient>, oauth: Option<OAuthClient>) -> Self {
        Self { store, http, oauth }
    }

    async fn load(&self, credentials_ref: &str) -> Result<Credentials, SyncError> {
        self.store.load(credentials_ref).await?.ok_or_else(|| {
            SyncError::Config(format!("no credentials stored for '{}'", credentials_ref))
        })
    }

    /// Current access token, refreshed first if it is about to expire
    pub async fn access_token(&self, credentials_ref: &str) -> Result<String, SyncError> {
        self.current_token(credentials_ref).await.map(|(token, _)| token)
    }

    /// Token plus whether obtaining it ran a refresh grant
    async fn current_token(&self, credentials_ref: &str) -> Result<(String, bool), SyncError> {
        let credentials = self.load(credentials_ref).await?;
        if credentials.expires_within(Duration::seconds(REFRESH_WINDOW_SECS), Utc::now()) {
            info!(credentials_ref, "Access token expiring, refreshing");
            let refreshed = self.refresh(credentials_ref, &credentials).await?;
            return Ok((refreshed.access_token, true));
        }
        Ok((credentials.access_token, false))
    }

    /// Refresh regardless of expiry (after the source rejected the token)
    pub async fn force_refresh(&self, credentials_ref: &str) -> Result<String, SyncError> {
        let credentials = self.load(credentials_ref).await?;
        let refreshed = self.refresh(credentials_ref, &credentials).await?;
        Ok(refreshed.access_token)
    }

    async fn refresh(&self, credentials_ref: &str, current: &Credentials) -> Result<Credentials, SyncError> {
        let (Some(oauth), Some(refresh_token)) = (&self.oauth, current.refresh_token.as_deref()) else {
            return Err(SyncError::Auth(
                "access token expired and cannot be refreshed".to_string(),
            ));
        };

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
        ];
        let response = self
            .http
            .post_form(&oauth.token_url, &form)
            .await
            .map_err(|e| match e {
                // invalid_grant comes back as 400
                SyncError::Config(msg) => SyncError::Auth(format!("token refresh rejected: {}", msg)),
                other => other,
            })?;

        let refreshed = parse_token_response(&response, current)?;
        // Persist before returning so the next call sees the new grant
        self.store.save(credentials_ref, &refreshed).await?;
        info!(credentials_ref, "Access token refreshed");
        Ok(refreshed)
    }

    /// Run `call` with a token; on `Auth` refresh once and retry
    ///
    /// At most one refresh grant runs per call: a token that was just
    /// refreshed proactively is not refreshed again when rejected.
    pub async fn authorized<F, Fut, T>(&self, credentials_ref: &str, mut call: F) -> Result<T, SyncError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let (token, refreshed) = self.current_token(credentials_ref).await?;
        match call(token).await {
            Err(SyncError::Auth(message)) if !refreshed => {
                warn!(credentials_ref, "Source rejected token, refreshing once");
                let token = self.force_refresh(credentials_ref).await.map_err(|e| match e {
                    SyncError::Auth(_) => SyncError::Auth(message),
                    other => other,
                })?;
                call(token).await
            }
            other => other,
        }
    }
}

fn parse_token_response(response: &Value, current: &Credentials) -> Result<Credentials, SyncError> {
    let access_token = response
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| SyncError::Auth("token endpoint returned no access token".to_string()))?;

    let expires_at = response
        .get("expires_in")
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .map(|secs| Utc::now() + Duration::seconds(secs));

    // Some providers rotate refresh tokens, others keep the old one valid
    let refresh_token = response
        .get("refresh_token")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| current.refresh_token.clone());

    Ok(Credentials {
        access_token: access_token.to_string(),
        refresh_token,
        expires_at,
    })
}
