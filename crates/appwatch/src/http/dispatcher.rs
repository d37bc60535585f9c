//! Authenticated request executor shared by the token broker and the notifier.

use appwatch_common::AppWatchError;
use reqwest::{Client, Method, Url};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Longest slice of an error response body kept in `AppWatchError::Status`
const MAX_ERROR_BODY: usize = 512;

/// Transport trust policy for HTTPS endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsPolicy {
    /// Accept any server certificate (self-signed internal endpoints)
    pub insecure_skip_verify: bool,
}

/// A single outgoing call
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Bearer token, omitted when empty
    pub token: Option<String>,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub json_body: Option<Map<String, Value>>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            token: None,
            query: HashMap::new(),
            headers: HashMap::new(),
            json_body: None,
            timeout,
        }
    }

    #[cfg(test)]
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self::new(Method::GET, url, timeout)
    }

    /// POST with an empty JSON object body
    pub fn post(url: impl Into<String>, timeout: Duration) -> Self {
        Self::new(Method::POST, url, timeout).json(Map::new())
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[cfg(test)]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn json(mut self, body: Map<String, Value>) -> Self {
        self.json_body = Some(body);
        self
    }

    fn carries_body(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }
}

/// Fully drained response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client wrapper applying auth, query, body and timeout per request
#[derive(Clone)]
pub struct HttpDispatcher {
    client: Client,
}

impl HttpDispatcher {
    pub fn new(policy: TlsPolicy) -> Result<Self, AppWatchError> {
        if policy.insecure_skip_verify {
            tracing::warn!(
                "⚠️ TLS certificate validation is DISABLED for management API calls \
                 (management.insecure_skip_verify = true); only use this against trusted internal endpoints"
            );
        }

        let client = Client::builder()
            .danger_accept_invalid_certs(policy.insecure_skip_verify)
            .build()
            .map_err(|e| AppWatchError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Assemble the wire request without sending it
    pub fn build(&self, request: &HttpRequest) -> Result<reqwest::Request, AppWatchError> {
        let mut url = Url::parse(&request.url)
            .map_err(|e| AppWatchError::Config(format!("invalid URL {}: {e}", request.url)))?;

        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(token) = request.token.as_deref().filter(|t| !t.is_empty()) {
            builder = builder.bearer_auth(token);
        }

        if request.carries_body() {
            if let Some(body) = &request.json_body {
                builder = builder.json(body);
            }
        }

        builder
            .build()
            .map_err(|e| AppWatchError::Config(format!("invalid request: {e}")))
    }

    /// Send the request and drain the body. Non-2xx statuses become `AppWatchError::Status`.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, AppWatchError> {
        let wire = self.build(&request)?;

        tracing::debug!(method = %wire.method(), url = %wire.url(), "Dispatching request");

        let response = self.client.execute(wire).await.map_err(classify)?;
        let status = response.status();
        let body = response.bytes().await.map_err(classify)?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(AppWatchError::Status {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            body: body.to_vec(),
        })
    }
}

/// Map a transport failure onto the shared error kinds. Failures while
/// reading a body count as connectivity problems.
pub(crate) fn classify(err: reqwest::Error) -> AppWatchError {
    if err.is_timeout() {
        AppWatchError::Timeout(err.to_string())
    } else if err.is_builder() {
        AppWatchError::Config(err.to_string())
    } else if err.is_decode() {
        AppWatchError::Parse(err.to_string())
    } else {
        AppWatchError::Connect(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_server;
    use axum::{Json, Router, http::HeaderMap, routing::{get, post}};
    use tokio::io::AsyncWriteExt;
    use tokio_test::assert_err;

    fn dispatcher() -> HttpDispatcher {
        HttpDispatcher::new(TlsPolicy::default()).unwrap()
    }

    #[test]
    fn test_query_params_in_url() {
        let request = HttpRequest::get("http://appmgr.local/apps", Duration::from_secs(5))
            .query("a", "1");
        let wire = dispatcher().build(&request).unwrap();
        assert!(wire.url().query().unwrap().contains("a=1"));
    }

    #[test]
    fn test_bearer_header() {
        let request =
            HttpRequest::post("http://appmgr.local/", Duration::from_secs(5)).bearer("T1");
        let wire = dispatcher().build(&request).unwrap();
        assert_eq!(wire.headers()["authorization"], "Bearer T1");
        assert_eq!(wire.headers()["content-type"], "application/json");
        assert_eq!(wire.timeout(), Some(&Duration::from_secs(5)));
    }

    #[test]
    fn test_empty_token_sends_no_auth() {
        let request = HttpRequest::get("http://appmgr.local/", Duration::from_secs(5)).bearer("");
        let wire = dispatcher().build(&request).unwrap();
        assert!(wire.headers().get("authorization").is_none());
    }

    #[test]
    fn test_get_ignores_json_body() {
        let request = HttpRequest::get("http://appmgr.local/", Duration::from_secs(5))
            .json(Map::new());
        let wire = dispatcher().build(&request).unwrap();
        assert!(wire.body().is_none());
    }

    #[test]
    fn test_invalid_url() {
        let request = HttpRequest::get("not a url", Duration::from_secs(5));
        assert!(matches!(
            dispatcher().build(&request),
            Err(AppWatchError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_posts_json() {
        let app = Router::new().route(
            "/notify",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(serde_json::json!({ "auth": auth, "body": body }))
            }),
        );
        let addr = spawn_server(app).await;

        let request = HttpRequest::post(format!("http://{addr}/notify"), Duration::from_secs(5))
            .bearer("T1");
        let response = dispatcher().execute(request).await.unwrap();

        assert_eq!(response.status, 200);
        let echoed: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(echoed["auth"], "Bearer T1");
        assert_eq!(echoed["body"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_execute_non_success_status() {
        let app = Router::new().route(
            "/notify",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let addr = spawn_server(app).await;

        let request = HttpRequest::post(format!("http://{addr}/notify"), Duration::from_secs(5));
        match dispatcher().execute(request).await {
            Err(AppWatchError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_connect_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let request = HttpRequest::get(format!("http://{addr}/"), Duration::from_secs(2));
        let err = assert_err!(dispatcher().execute(request).await);
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let app = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let addr = spawn_server(app).await;

        let request = HttpRequest::get(format!("http://{addr}/slow"), Duration::from_millis(100));
        let err = assert_err!(dispatcher().execute(request).await);
        assert!(matches!(err, AppWatchError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_truncated_body_is_connectivity_error() {
        // Promise more bytes than are sent, then hang up mid-body
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let request = HttpRequest::get(format!("http://{addr}/"), Duration::from_secs(5));
        let err = assert_err!(dispatcher().execute(request).await);
        assert!(matches!(err, AppWatchError::Connect(_)), "got {err:?}");
        assert!(err.is_connectivity());
    }
}
