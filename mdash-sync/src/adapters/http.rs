//! Shared HTTP plumbing for source adapters
//!
//! Requests are paced with a `governor` token bucket and responses are
//! mapped onto the [`SyncError`] taxonomy. Access tokens travel only in the
//! `Authorization` header.

use crate::error::SyncError;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("mdash-sync/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Graph-style `error.code` values that mean throttling
const THROTTLE_CODES: &[i64] = &[4, 17, 32, 613, 80000, 80003, 80004];
/// Graph-style `error.code` for an invalid or expired token
const INVALID_TOKEN_CODE: i64 = 190;

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Paced JSON client shared by all adapters
pub struct HttpClient {
    client: reqwest::Client,
    rate_limiter: Arc<DirectRateLimiter>,
}

impl HttpClient {
    pub fn new(requests_per_second: u32) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            rate_limiter,
        })
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// Authorized GET returning the JSON body
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, &str)],
        token: &str,
    ) -> Result<Value, SyncError> {
        let mut request = self.client.get(url).bearer_auth(token).query(query);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        self.send(request).await
    }

    /// Form POST without bearer auth (OAuth token endpoint)
    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Value, SyncError> {
        self.send(self.client.post(url).form(form)).await
    }

    /// Send after pacing, classifying failures
    pub async fn send(&self, request: RequestBuilder) -> Result<Value, SyncError> {
        self.rate_limiter.until_ready().await;

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "Source request failed");
            return Err(classify_status(status, &headers, &body));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| {
            SyncError::TransientNetwork(format!("Malformed JSON response: {}", e))
        })
    }
}

/// Connection-level failures; the URL is stripped so query strings never leak
pub fn classify_transport(err: reqwest::Error) -> SyncError {
    let err = err.without_url();
    if err.is_timeout() {
        SyncError::TransientNetwork(format!("request timed out: {}", err))
    } else if err.is_connect() {
        SyncError::TransientNetwork(format!("connection failed: {}", err))
    } else if err.is_builder() {
        SyncError::Config(format!("invalid request: {}", err))
    } else {
        SyncError::TransientNetwork(err.to_string())
    }
}

/// `Retry-After` as delta-seconds or HTTP date
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let delta = at - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

fn provider_error(body: &str) -> Option<(Option<i64>, String)> {
    let json: Value = serde_json::from_str(body).ok()?;
    let error = json.get("error")?;
    match error {
        Value::String(message) => Some((None, message.clone())),
        Value::Object(obj) => {
            let code = obj.get("code").and_then(Value::as_i64);
            let message = obj
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| json.get("message").and_then(Value::as_str))
                .unwrap_or_default()
                .to_string();
            Some((code, message))
        }
        _ => None,
    }
}

/// Map a non-success response onto the error taxonomy
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> SyncError {
    let provider = provider_error(body);
    let code = provider.as_ref().and_then(|(code, _)| *code);
    let detail = provider
        .map(|(_, message)| message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());

    if code.is_some_and(|c| THROTTLE_CODES.contains(&c)) {
        return SyncError::RateLimited {
            retry_after: parse_retry_after(headers),
        };
    }
    if code == Some(INVALID_TOKEN_CODE) {
        return SyncError::Auth(detail);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Auth(format!(
            "{} {}",
            status.as_u16(),
            detail
        )),
        StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited {
            retry_after: parse_retry_after(headers),
        },
        StatusCode::REQUEST_TIMEOUT => {
            SyncError::TransientNetwork(format!("{} {}", status.as_u16(), detail))
        }
        s if s.is_server_error() => {
            SyncError::TransientNetwork(format!("{} {}", status.as_u16(), detail))
        }
        _ => SyncError::Config(format!("{} {}", status.as_u16(), detail)),
    }
}
