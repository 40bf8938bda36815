use std::time::Duration;

use anyhow::{Context, Result};

use crate::client::RetryPolicy;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_BATCH_SIZE: u32 = 100;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub api_url: String,
    pub api_token: Option<String>,
    /// Mirrors the server's upload limit so oversized files fail before upload.
    pub max_upload_bytes: u64,
    pub batch_size: u32,
    pub retry: RetryPolicy,
    pub request_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_token: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::none(),
            request_timeout: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("TALLY_API_URL").context("TALLY_API_URL is required")?;
        let mut config = Self::new(api_url.trim_end_matches('/'));

        config.api_token = lookup("TALLY_API_TOKEN").filter(|token| !token.is_empty());

        if let Some(raw) = lookup("TALLY_MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = raw
                .parse()
                .with_context(|| format!("TALLY_MAX_UPLOAD_BYTES is not a number: {raw}"))?;
        }

        if let Some(raw) = lookup("TALLY_IMPORT_BATCH_SIZE") {
            let batch_size: u32 = raw
                .parse()
                .with_context(|| format!("TALLY_IMPORT_BATCH_SIZE is not a number: {raw}"))?;
            if batch_size == 0 {
                anyhow::bail!("TALLY_IMPORT_BATCH_SIZE must be greater than zero");
            }
            config.batch_size = batch_size;
        }

        if let Some(raw) = lookup("TALLY_HTTP_RETRIES") {
            let max_retries = raw
                .parse()
                .with_context(|| format!("TALLY_HTTP_RETRIES is not a number: {raw}"))?;
            config.retry = RetryPolicy::new(max_retries, config.retry.backoff);
        }

        if let Some(raw) = lookup("TALLY_HTTP_TIMEOUT_SECS") {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("TALLY_HTTP_TIMEOUT_SECS is not a number: {raw}"))?;
            config.request_timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn api_url_is_required() {
        let err = ClientConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("TALLY_API_URL"));
    }

    #[test]
    fn defaults_apply_when_only_url_is_set() {
        let config =
            ClientConfig::from_lookup(lookup_from(&[("TALLY_API_URL", "http://erp.local/api/")]))
                .unwrap();

        assert_eq!(config.api_url, "http://erp.local/api");
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.retry.max_retries, 0);
        assert!(config.api_token.is_none());
        assert!(config.request_timeout.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("TALLY_API_URL", "http://erp.local"),
            ("TALLY_API_TOKEN", "secret"),
            ("TALLY_MAX_UPLOAD_BYTES", "2048"),
            ("TALLY_IMPORT_BATCH_SIZE", "250"),
            ("TALLY_HTTP_RETRIES", "2"),
            ("TALLY_HTTP_TIMEOUT_SECS", "15"),
        ]))
        .unwrap();

        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.max_upload_bytes, 2048);
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(15)));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = ClientConfig::from_lookup(lookup_from(&[
            ("TALLY_API_URL", "http://erp.local"),
            ("TALLY_IMPORT_BATCH_SIZE", "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }
}
