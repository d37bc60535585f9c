//! Consul KV client over the HTTP API.
//!
//! Reads `GET /v1/kv/{key}` with optional `index` / `wait` blocking-query
//! parameters. The index always comes from the `X-Consul-Index` header,
//! including on 404 (key absent), so a missing key can still be long-polled.

use appwatch_common::AppWatchError;
use appwatch_common::constants::{consul_keys, headers};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

use super::{KvPair, KvResponse, KvStore, QueryMeta, QueryOptions};
use crate::http::classify;

/// Consul connection settings
#[derive(Debug, Clone)]
pub struct ConsulConfig {
    /// `host:port` or full URL
    pub address: String,
    /// ACL token
    pub token: Option<String>,
    /// Added on top of the wait time for the HTTP deadline
    pub timeout_margin: Duration,
}

/// Entry as returned by the KV endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvRecord {
    key: String,
    #[serde(default)]
    value: Option<String>,
    modify_index: u64,
}

/// Consul-backed `KvStore`
pub struct ConsulClient {
    client: Client,
    base: Url,
    token: Option<String>,
    timeout_margin: Duration,
}

impl ConsulClient {
    pub fn new(config: ConsulConfig) -> Result<Self, AppWatchError> {
        let base = parse_address(&config.address)?;
        let client = Client::builder()
            .build()
            .map_err(|e| AppWatchError::Config(format!("failed to build Consul client: {e}")))?;

        Ok(Self {
            client,
            base,
            token: config.token.filter(|t| !t.is_empty()),
            timeout_margin: config.timeout_margin,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn kv_url(&self, key: &str, options: &QueryOptions) -> Result<Url, AppWatchError> {
        let path = format!("{}{}", consul_keys::KV_API_PATH, key.trim_start_matches('/'));
        let mut url = self
            .base
            .join(&path)
            .map_err(|e| AppWatchError::Config(format!("invalid key {key}: {e}")))?;

        if options.is_blocking() {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("index", &options.wait_index.to_string());
            if let Some(wait) = options.wait_time {
                pairs.append_pair("wait", &format!("{}s", wait.as_secs().max(1)));
            }
        }

        Ok(url)
    }

    /// Consul adds up to wait/16 of jitter to blocking queries
    fn deadline(&self, options: &QueryOptions) -> Duration {
        match options.wait_time.filter(|_| options.is_blocking()) {
            Some(wait) => wait + wait / 16 + self.timeout_margin,
            None => self.timeout_margin,
        }
    }
}

#[async_trait]
impl KvStore for ConsulClient {
    async fn get(&self, key: &str, options: QueryOptions) -> Result<KvResponse, AppWatchError> {
        let url = self.kv_url(key, &options)?;
        let mut request = self.client.get(url).timeout(self.deadline(&options));
        if let Some(ref token) = self.token {
            request = request.header(headers::X_CONSUL_TOKEN, token);
        }

        let response = request.send().await.map_err(classify)?;

        let status = response.status();
        let last_index = parse_index(response.headers().get(headers::X_CONSUL_INDEX))?;
        let body = response.bytes().await.map_err(classify)?;

        let pair = match status {
            StatusCode::OK => decode_records(key, &body)?,
            StatusCode::NOT_FOUND => None,
            other => {
                return Err(AppWatchError::Status {
                    status: other.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            }
        };

        Ok(KvResponse {
            pair,
            meta: QueryMeta { last_index },
        })
    }
}

fn parse_address(address: &str) -> Result<Url, AppWatchError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(AppWatchError::Config("Consul address is empty".to_string()));
    }
    let with_scheme = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    };
    Url::parse(&with_scheme)
        .map_err(|e| AppWatchError::Config(format!("invalid Consul address {address}: {e}")))
}

fn parse_index(value: Option<&reqwest::header::HeaderValue>) -> Result<u64, AppWatchError> {
    let raw = value.ok_or_else(|| {
        AppWatchError::Store(format!("response missing {} header", headers::X_CONSUL_INDEX))
    })?;
    raw.to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            AppWatchError::Store(format!(
                "incorrect {} header: {:?}",
                headers::X_CONSUL_INDEX,
                raw
            ))
        })
}

fn decode_records(key: &str, body: &[u8]) -> Result<Option<KvPair>, AppWatchError> {
    let records: Vec<KvRecord> = serde_json::from_slice(body)
        .map_err(|e| AppWatchError::Parse(format!("KV response for {key}: {e}")))?;

    let Some(record) = records.into_iter().find(|r| r.key == key) else {
        return Ok(None);
    };

    let value = match record.value {
        Some(encoded) => Some(
            STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| AppWatchError::Parse(format!("KV value for {key}: {e}")))?,
        ),
        None => None,
    };

    Ok(Some(KvPair {
        key: record.key,
        value,
        modify_index: record.modify_index,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_server;
    use axum::{
        Json, Router,
        extract::{Path, Query},
        http::{HeaderMap, StatusCode as AxumStatus},
        response::IntoResponse,
        routing::get,
    };
    use serde_json::json;
    use std::collections::HashMap;

    fn client(address: String) -> ConsulClient {
        ConsulClient::new(ConsulConfig {
            address,
            token: Some("acl-token".to_string()),
            timeout_margin: Duration::from_secs(5),
        })
        .unwrap()
    }

    async fn kv_handler(
        Path(key): Path<String>,
        Query(params): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> axum::response::Response {
        let token = headers
            .get("x-consul-token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        match key.as_str() {
            "appmgr/topology/host1" => {
                // Echo the wait index back as +1 to prove the params arrived
                let index = params
                    .get("index")
                    .and_then(|i| i.parse::<u64>().ok())
                    .map(|i| i + 1)
                    .unwrap_or(5);
                let value = STANDARD.encode(format!("v{index}:{token}"));
                (
                    [("X-Consul-Index", index.to_string())],
                    Json(json!([{
                        "Key": key,
                        "Value": value,
                        "ModifyIndex": index,
                        "CreateIndex": 1,
                        "Flags": 0,
                        "LockIndex": 0
                    }])),
                )
                    .into_response()
            }
            "appmgr/topology/noindex" => Json(json!([])).into_response(),
            _ => (AxumStatus::NOT_FOUND, [("X-Consul-Index", "42")]).into_response(),
        }
    }

    fn consul_app() -> Router {
        Router::new().route("/v1/kv/{*key}", get(kv_handler))
    }

    #[test]
    fn test_address_without_scheme() {
        let client = client("10.1.241.54:8500".to_string());
        assert_eq!(client.base_url().as_str(), "http://10.1.241.54:8500/");
    }

    #[test]
    fn test_empty_address_rejected() {
        let result = ConsulClient::new(ConsulConfig {
            address: "  ".to_string(),
            token: None,
            timeout_margin: Duration::from_secs(5),
        });
        assert!(matches!(result, Err(AppWatchError::Config(_))));
    }

    #[test]
    fn test_blocking_query_url() {
        let client = client("127.0.0.1:8500".to_string());
        let url = client
            .kv_url(
                "appmgr/topology/host1",
                &QueryOptions::blocking(6, Duration::from_secs(30)),
            )
            .unwrap();
        assert_eq!(url.path(), "/v1/kv/appmgr/topology/host1");
        assert_eq!(url.query(), Some("index=6&wait=30s"));

        let plain = client
            .kv_url("appmgr/topology/host1", &QueryOptions::default())
            .unwrap();
        assert_eq!(plain.query(), None);
    }

    #[test]
    fn test_deadline_covers_jitter() {
        let client = client("127.0.0.1:8500".to_string());
        let deadline = client.deadline(&QueryOptions::blocking(1, Duration::from_secs(32)));
        assert_eq!(deadline, Duration::from_secs(32 + 2 + 5));
    }

    #[tokio::test]
    async fn test_get_existing_key() {
        let addr = spawn_server(consul_app()).await;
        let client = client(addr.to_string());

        let response = client
            .get("appmgr/topology/host1", QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(response.meta.last_index, 5);
        assert_eq!(response.value(), Some(b"v5:acl-token".to_vec()));

        let response = client
            .get(
                "appmgr/topology/host1",
                QueryOptions::blocking(5, Duration::from_secs(1)),
            )
            .await
            .unwrap();
        assert_eq!(response.meta.last_index, 6);
        assert_eq!(response.pair.unwrap().modify_index, 6);
    }

    #[tokio::test]
    async fn test_get_missing_key_keeps_index() {
        let addr = spawn_server(consul_app()).await;
        let response = client(addr.to_string())
            .get("appmgr/topology/other", QueryOptions::default())
            .await
            .unwrap();
        assert!(response.pair.is_none());
        assert_eq!(response.meta.last_index, 42);
    }

    #[tokio::test]
    async fn test_missing_index_header_is_store_error() {
        let addr = spawn_server(consul_app()).await;
        let result = client(addr.to_string())
            .get("appmgr/topology/noindex", QueryOptions::default())
            .await;
        assert!(matches!(result, Err(AppWatchError::Store(_))));
    }

    #[test]
    fn test_decode_null_value() {
        let body = br#"[{"Key":"appmgr/security","Value":null,"ModifyIndex":9}]"#;
        let pair = decode_records("appmgr/security", body).unwrap().unwrap();
        assert_eq!(pair.value, None);
        assert_eq!(pair.modify_index, 9);
    }
}
