//! KV REST client
//!
//! Speaks the minimal REST contract:
//!
//! - `PUT  {base}/values/{key}` with a JSON body
//! - `GET  {base}/values/{key}` (404 means absent)
//! - `GET  {base}/keys?prefix=...` returning either a bare array of key
//!   names or a Cloudflare-style `{"result": [{"name": ...}]}` envelope
//!
//! Every request carries a bearer token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::KvStore;
use crate::error::StoreError;

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyListing {
    Plain(Vec<String>),
    Envelope { result: Vec<KeyName> },
}

#[derive(Deserialize)]
struct KeyName {
    name: String,
}

impl KeyListing {
    fn into_names(self) -> Vec<String> {
        match self {
            KeyListing::Plain(names) => names,
            KeyListing::Envelope { result } => result.into_iter().map(|k| k.name).collect(),
        }
    }
}

/// HTTP-backed KV store
#[derive(Debug, Clone)]
pub struct HttpKvStore {
    http: Client,
    base_url: Url,
    token: String,
    request_timeout: Duration,
}

impl HttpKvStore {
    pub fn new(base_url: &str, token: impl Into<String>, request_timeout: Duration) -> Result<Self, StoreError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| StoreError::Configuration(format!("invalid base URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::Configuration(format!(
                "base URL '{base_url}' cannot carry a path"
            )));
        }
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            token: token.into(),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/{segment}/{key}`, percent-encoding the key as one path segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Configuration("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn transport_error(&self, operation: &'static str, err: reqwest::Error) -> StoreError {
        if err.is_timeout() {
            StoreError::Timeout {
                operation,
                duration_ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl KvStore for HttpKvStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let url = self.endpoint(&["values", key])?;
        debug!(%url, "KV put");

        let response = self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .header("Content-Type", "application/json")
            .body(value.to_string())
            .send()
            .await
            .map_err(|e| self.transport_error("put", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                operation: "put",
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let url = self.endpoint(&["values", key])?;
        debug!(%url, "KV get");

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| self.transport_error("get", e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                operation: "get",
                key: key.to_string(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error("get", e))?;
        Ok(Some(body))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut url = self.endpoint(&["keys"])?;
        url.query_pairs_mut().append_pair("prefix", prefix);
        debug!(%url, "KV list");

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| self.transport_error("list", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                operation: "list",
                key: prefix.to_string(),
            });
        }
        let listing: KeyListing = response
            .json()
            .await
            .map_err(|e| self.transport_error("list", e))?;
        let mut keys = listing.into_names();
        keys.retain(|k| k.starts_with(prefix));
        Ok(keys)
    }
}
