//! Remote document-store backend.
//!
//! One document per instance id, holding the credential and key-mapping
//! blobs as JSON-encoded text fields plus a last-updated timestamp.
//! Wraps a `reqwest::Client` with automatic retry + exponential back-off on
//! transient (5xx / timeout) failures; 4xx responses are never retried.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cw_domain::config::RemoteStoreConfig;
use cw_domain::{AuthState, Error, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::AuthStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Document shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wire shape of one persisted session document.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionDocument {
    pub instance_id: String,
    /// JSON-encoded credential blob.
    pub creds: String,
    /// JSON-encoded key mapping.
    pub keys: String,
    pub updated_at: DateTime<Utc>,
}

impl SessionDocument {
    fn encode(instance_id: &str, state: &AuthState) -> Result<Self> {
        Ok(Self {
            instance_id: instance_id.to_owned(),
            creds: serde_json::to_string(&state.creds)?,
            keys: serde_json::to_string(&state.keys)?,
            updated_at: Utc::now(),
        })
    }

    fn decode(&self) -> Result<AuthState> {
        Ok(AuthState {
            creds: serde_json::from_str(&self.creds)?,
            keys: serde_json::from_str(&self.keys)?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RemoteAuthStore {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl RemoteAuthStore {
    pub fn new(cfg: &RemoteStoreConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .filter(|key| !key.is_empty());

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key,
            max_retries: cfg.max_retries,
        })
    }

    fn url(&self, instance_id: &str) -> String {
        format!("{}/v1/sessions/{instance_id}", self.base_url)
    }

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => rb.header("X-Api-Key", key),
            None => rb,
        }
    }

    /// Probe the store's health endpoint. Used at boot to decide whether the
    /// remote backend participates at all.
    pub async fn healthy(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "remote store health probe failed");
                false
            }
        }
    }

    /// Execute a request with retry + exponential back-off on transient
    /// failures.
    async fn execute_with_retry(
        &self,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err = Error::Http("no attempt made".into());

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            match self.decorate(build_request()).send().await {
                Ok(resp) if resp.status().is_server_error() => {
                    last_err = Error::Http(format!("remote store returned {}", resp.status()));
                }
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_err = Error::Http(e.to_string());
                }
                Err(e) => return Err(Error::Http(e.to_string())),
            }
        }

        Err(last_err)
    }
}

/// Back-off before the Nth retry. The doubling is capped so an oversized
/// retry count cannot overflow the shift or stall a save for minutes.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(100 * 2u64.pow(attempt.saturating_sub(1).min(6)))
}

#[async_trait]
impl AuthStore for RemoteAuthStore {
    async fn exists(&self, instance_id: &str) -> bool {
        let url = self.url(instance_id);
        match self.execute_with_retry(|| self.http.head(&url)).await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!(instance = %instance_id, error = %e, "remote exists check failed, treating as absent");
                false
            }
        }
    }

    async fn load(&self, instance_id: &str) -> Option<AuthState> {
        let url = self.url(instance_id);
        let resp = match self.execute_with_retry(|| self.http.get(&url)).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(instance = %instance_id, error = %e, "remote load failed, treating as absent");
                return None;
            }
        };

        if resp.status() == StatusCode::NOT_FOUND {
            return None;
        }
        if !resp.status().is_success() {
            tracing::warn!(
                instance = %instance_id,
                status = resp.status().as_u16(),
                "unexpected remote store response, treating as absent"
            );
            return None;
        }

        let doc: SessionDocument = match resp.json().await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(instance = %instance_id, error = %e, "remote document unparsable");
                return None;
            }
        };

        match doc.decode() {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(instance = %instance_id, error = %e, "remote document blobs corrupt");
                None
            }
        }
    }

    async fn save(&self, instance_id: &str, state: &AuthState) -> Result<()> {
        let doc = SessionDocument::encode(instance_id, state)?;
        let url = self.url(instance_id);
        let resp = self
            .execute_with_retry(|| self.http.put(&url).json(&doc))
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Store(format!(
                "remote save for {instance_id} returned {}",
                resp.status()
            )));
        }

        tracing::debug!(instance = %instance_id, "credentials saved to remote store");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "remote"
    }
}
