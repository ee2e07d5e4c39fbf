//! # REST Remote Store
//!
//! [`RemoteStore`] over a PostgREST-style HTTP API.
//!
//! ## Request Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Mutation             HTTP request                                      │
//! │  ───────────────────  ───────────────────────────────────────────────   │
//! │  Insert(record)       POST   {base}/{collection}          body: record  │
//! │                       Prefer: resolution=merge-duplicates (re-delivery  │
//! │                       of the same insert is an upsert, not a conflict)  │
//! │  Update{key, record}  PATCH  {base}/{collection}?{pk}=eq.{key}          │
//! │  Delete(key)          DELETE {base}/{collection}?{pk}=eq.{key}          │
//! │                                                                         │
//! │  Headers on every request:                                              │
//! │    apikey / Authorization: Bearer   (when an API key is configured)    │
//! │    X-Device-Id                      (when a device id is configured)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Response Classification
//! ```text
//! 2xx                → Ok
//! 5xx / 408 / 429    → RemoteError::Unavailable   (transient)
//! other 4xx          → RemoteError::Rejected      (counts toward dead-letter)
//! connect failure    → RemoteError::Unreachable   (transient)
//! client timeout     → RemoteError::TimedOut      (transient)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder};
use tracing::debug;
use url::Url;

use fieldops_core::validation::validate_collection_name;
use fieldops_core::{Record, RecordKey};

use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::remote::RemoteStore;

const MAX_ERROR_BODY: usize = 512;

// =============================================================================
// Configuration
// =============================================================================

/// REST client configuration.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL, e.g. `https://host/rest/v1`.
    pub base_url: String,

    /// API key, if the store requires one.
    pub api_key: Option<String>,

    /// Sent as `X-Device-Id`.
    pub device_id: Option<String>,

    /// Column used to address updates and deletes.
    pub primary_key: String,

    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,

    /// Whole-request timeout. Keep at or below the engine's per-item timeout.
    pub request_timeout: Duration,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        RestConfig {
            base_url: base_url.into(),
            api_key: None,
            device_id: None,
            primary_key: fieldops_core::PRIMARY_KEY_FIELD.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
        }
    }

    /// Builds the REST settings from the sync configuration.
    ///
    /// Returns `None` when no remote URL is configured.
    pub fn from_sync_config(config: &SyncConfig) -> Option<Self> {
        let base_url = config.remote_url()?;
        Some(RestConfig {
            base_url: base_url.to_string(),
            api_key: config.remote.api_key.clone(),
            device_id: Some(config.device_id().to_string()),
            primary_key: config.remote.primary_key.clone(),
            connect_timeout: Duration::from_secs(config.remote.connect_timeout_secs),
            request_timeout: config.sync.item_timeout(),
        })
    }
}

// =============================================================================
// Client
// =============================================================================

/// PostgREST-style remote store.
#[derive(Debug, Clone)]
pub struct RestRemoteStore {
    client: Client,
    base: Url,
    primary_key: String,
    request_timeout: Duration,
}

impl RestRemoteStore {
    /// Creates the client.
    ///
    /// Fails on an unparsable base URL or a header value that is not valid
    /// HTTP (e.g. a newline inside the API key).
    pub fn new(config: RestConfig) -> SyncResult<Self> {
        let mut base = Url::parse(&config.base_url)?;
        // Url::join replaces the last segment unless the path ends with '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        if let Some(ref key) = config.api_key {
            headers.insert(HeaderName::from_static("apikey"), header_value(key)?);
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", key))?);
        }
        if let Some(ref device_id) = config.device_id {
            headers.insert(HeaderName::from_static("x-device-id"), header_value(device_id)?);
        }

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(RestRemoteStore {
            client,
            base,
            primary_key: config.primary_key,
            request_timeout: config.request_timeout,
        })
    }

    /// Returns the normalized base URL.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn collection_url(&self, collection: &str) -> Result<Url, RemoteError> {
        validate_collection_name(collection)
            .map_err(|e| RemoteError::InvalidRequest(e.to_string()))?;

        self.base
            .join(collection)
            .map_err(|e| RemoteError::InvalidRequest(e.to_string()))
    }

    fn keyed_url(&self, collection: &str, key: &RecordKey) -> Result<Url, RemoteError> {
        let mut url = self.collection_url(collection)?;
        url.query_pairs_mut()
            .append_pair(&self.primary_key, &format!("eq.{}", key));
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<(), RemoteError> {
        let response = request
            .header("Prefer", "return=minimal")
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        let message = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("error").to_string()
        } else {
            body
        };

        Err(RemoteError::from_status(status.as_u16(), message))
    }

    fn classify(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::TimedOut(
                u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX),
            )
        } else if err.is_builder() {
            RemoteError::InvalidRequest(err.to_string())
        } else {
            RemoteError::Unreachable(err.to_string())
        }
    }
}

fn header_value(value: &str) -> SyncResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| SyncError::InvalidConfig(format!("invalid header value: {}", e)))
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn insert(&self, collection: &str, record: &Record) -> Result<(), RemoteError> {
        let url = self.collection_url(collection)?;
        debug!(%url, "POST");

        self.send(
            self.client
                .post(url)
                .header("Prefer", "resolution=merge-duplicates")
                .json(record),
        )
        .await
    }

    async fn update(&self, collection: &str, key: &RecordKey, record: &Record) -> Result<(), RemoteError> {
        let url = self.keyed_url(collection, key)?;
        debug!(%url, "PATCH");

        self.send(self.client.patch(url).json(record)).await
    }

    async fn delete(&self, collection: &str, key: &RecordKey) -> Result<(), RemoteError> {
        let url = self.keyed_url(collection, key)?;
        debug!(%url, "DELETE");

        self.send(self.client.delete(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Accepts one request, answers with `status`, returns the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/rest/v1", listener.local_addr().unwrap());

        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];

            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= head_end + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();

            String::from_utf8_lossy(&raw).to_string()
        });

        (base, task)
    }

    fn store(base: &str) -> RestRemoteStore {
        let mut config = RestConfig::new(base);
        config.api_key = Some("secret".into());
        config.device_id = Some("tablet-1".into());
        config.request_timeout = Duration::from_secs(5);
        RestRemoteStore::new(config).unwrap()
    }

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_posts_to_collection() {
        let (base, server) = serve_once("201 Created", "").await;

        store(&base)
            .insert("farmers", &record(json!({ "id": "F1", "name": "A" })))
            .await
            .unwrap();

        let request = server.await.unwrap();
        let lower = request.to_lowercase();
        assert!(request.starts_with("POST /rest/v1/farmers HTTP/1.1"));
        assert!(lower.contains("apikey: secret"));
        assert!(lower.contains("authorization: bearer secret"));
        assert!(lower.contains("x-device-id: tablet-1"));
        assert!(lower.contains("resolution=merge-duplicates"));
        assert!(request.contains("\"name\":\"A\""));
    }

    #[tokio::test]
    async fn test_update_filters_by_primary_key() {
        let (base, server) = serve_once("204 No Content", "").await;

        store(&base)
            .update(
                "shipments",
                &RecordKey::from("S1"),
                &record(json!({ "id": "S1", "status": "delivered" })),
            )
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("PATCH /rest/v1/shipments?id=eq.S1 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_error_statuses_are_classified() {
        let (base, _server) = serve_once("503 Service Unavailable", "").await;
        let err = store(&base)
            .delete("farmers", &RecordKey::from(3_i64))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable { status: 503, .. }));

        let (base, _server) = serve_once("409 Conflict", r#"{"message":"duplicate key"}"#).await;
        let err = store(&base)
            .delete("farmers", &RecordKey::from(3_i64))
            .await
            .unwrap_err();
        match err {
            RemoteError::Rejected { status, message } => {
                assert_eq!(status, 409);
                assert!(message.contains("duplicate key"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/rest/v1", listener.local_addr().unwrap());
        drop(listener);

        let err = store(&base)
            .insert("farmers", &record(json!({ "id": "F1" })))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Connections queue in the backlog but nothing ever answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/rest/v1", listener.local_addr().unwrap());

        let mut config = RestConfig::new(base);
        config.request_timeout = Duration::from_millis(200);
        let store = RestRemoteStore::new(config).unwrap();

        let err = store
            .insert("farmers", &record(json!({ "id": "F1" })))
            .await
            .unwrap_err();

        assert_eq!(err, RemoteError::TimedOut(200));
        assert!(err.is_transient());
        drop(listener);
    }

    #[tokio::test]
    async fn test_invalid_collection_never_hits_network() {
        let err = store("http://127.0.0.1:9/rest/v1")
            .insert("../admin", &record(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::InvalidRequest(_)));
    }

    #[test]
    fn test_base_url_is_normalized() {
        let store = store("https://example.org/rest/v1");
        assert_eq!(store.base_url().as_str(), "https://example.org/rest/v1/");
        assert_eq!(
            store.collection_url("farmers").unwrap().as_str(),
            "https://example.org/rest/v1/farmers"
        );
    }
}
