use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, Url, multipart::Form};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ClientConfig;

const USER_AGENT: &str = concat!("tally/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("network error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::Timeout)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Retries for idempotent reads that failed before reaching the server.
///
/// Writes are never retried. The default performs a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::new(0, Duration::from_millis(250))
    }

    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Shared JSON-over-HTTP client for the accounting backend.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|err| ApiError::Client(err.to_string()))?;

        let base_url = Url::parse(&config.api_url)
            .map_err(|err| ApiError::Client(format!("invalid API URL '{}': {err}", config.api_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Client(format!(
                "API URL '{}' cannot carry a path",
                config.api_url
            )));
        }

        Ok(Self {
            http,
            base_url,
            token: config.api_token.clone(),
            retry: config.retry,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends `segments` to the base URL. Each segment is percent-encoded, so
    /// `/`, `?` and `#` inside a name stay part of that segment.
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.http.request(method, self.url(segments));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let response = self.get_with_retry(segments, query).await?;
        decode_json(response).await
    }

    pub async fn get_bytes(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<Vec<u8>, ApiError> {
        let response = self.get_with_retry(segments, query).await?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    pub async fn post_json<B, T>(&self, segments: &[&str], body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(?segments, "POST");
        let response = self.request(Method::POST, segments).json(body).send().await?;
        decode_json(check_status(response).await?).await
    }

    pub async fn put_json<B, T>(&self, segments: &[&str], body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(?segments, "PUT");
        let response = self.request(Method::PUT, segments).json(body).send().await?;
        decode_json(check_status(response).await?).await
    }

    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        form: Form,
    ) -> Result<T, ApiError> {
        debug!(?segments, "POST multipart");
        let response = self
            .request(Method::POST, segments)
            .multipart(form)
            .send()
            .await?;
        decode_json(check_status(response).await?).await
    }

    pub async fn delete(&self, segments: &[&str]) -> Result<(), ApiError> {
        debug!(?segments, "DELETE");
        let response = self.request(Method::DELETE, segments).send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn get_with_retry(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<Response, ApiError> {
        let mut attempt = 0;
        loop {
            debug!(?segments, attempt, "GET");
            let result = match self.request(Method::GET, segments).query(query).send().await {
                Ok(response) => check_status(response).await,
                Err(err) => Err(ApiError::from(err)),
            };

            match result {
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    warn!(?segments, attempt, ?delay, "retrying GET after error: {err}");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        message: error_message(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        }),
    })
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode(err.to_string()))
}

/// Extracts a readable message from `{"detail": ...}`, `{"message": ...}` or plain text bodies.
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => match map.get("detail").or_else(|| map.get("message")) {
            Some(Value::String(message)) => Some(message.clone()),
            Some(other) => Some(other.to_string()),
            None => Some(trimmed.to_string()),
        },
        _ => Some(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_detail() {
        assert_eq!(
            error_message(r#"{"detail": "session expired"}"#).as_deref(),
            Some("session expired")
        );
        assert_eq!(
            error_message(r#"{"message": "bad mapping"}"#).as_deref(),
            Some("bad mapping")
        );
        assert_eq!(
            error_message(r#"{"detail": [{"loc": ["file"]}]}"#).as_deref(),
            Some(r#"[{"loc":["file"]}]"#)
        );
        assert_eq!(error_message("Bad Gateway").as_deref(), Some("Bad Gateway"));
        assert_eq!(error_message("  "), None);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn urls_join_without_double_slashes() {
        let mut config = ClientConfig::new("http://erp.local/api/");
        config.api_token = Some("token".to_string());
        let client = ApiClient::new(&config).unwrap();

        assert_eq!(client.url(&["models"]).as_str(), "http://erp.local/api/models");
        assert_eq!(
            client.url(&["models", "account"]).as_str(),
            "http://erp.local/api/models/account"
        );

        let bare = ApiClient::new(&ClientConfig::new("http://erp.local")).unwrap();
        assert_eq!(bare.url(&["models"]).as_str(), "http://erp.local/models");
    }

    #[test]
    fn segments_are_percent_encoded() {
        let client = ApiClient::new(&ClientConfig::new("http://erp.local/api")).unwrap();

        assert_eq!(
            client.url(&["models", "cost_center#x"]).as_str(),
            "http://erp.local/api/models/cost_center%23x"
        );
        assert_eq!(
            client.url(&["models", "account?format=csv"]).as_str(),
            "http://erp.local/api/models/account%3Fformat=csv"
        );
        assert_eq!(
            client.url(&["models", "../admin"]).as_str(),
            "http://erp.local/api/models/..%2Fadmin"
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(matches!(
            ApiClient::new(&ClientConfig::new("not a url")),
            Err(ApiError::Client(_))
        ));
        assert!(matches!(
            ApiClient::new(&ClientConfig::new("mailto:ledger@example.com")),
            Err(ApiError::Client(_))
        ));
    }
}
