//! Token Broker
//!
//! Exchanges the configured username/password for a short-lived bearer
//! token. Credentials travel base64-encoded in the `username` / `password`
//! headers of an otherwise empty POST. Tokens are never cached; every
//! caller gets a fresh one.

use appwatch_common::constants::headers;
use appwatch_common::{AppWatchError, Credentials, TokenResponse};
use base64::{Engine, engine::general_purpose::STANDARD};
use std::time::Duration;

use super::dispatcher::{HttpDispatcher, HttpRequest};

/// Fetches bearer tokens from the application manager
#[derive(Clone)]
pub struct TokenBroker {
    dispatcher: HttpDispatcher,
    auth_url: String,
    timeout: Duration,
}

impl TokenBroker {
    pub fn new(dispatcher: HttpDispatcher, auth_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            dispatcher,
            auth_url: auth_url.into(),
            timeout,
        }
    }

    /// Acquire a fresh token
    pub async fn acquire_token(&self, credentials: &Credentials) -> Result<String, AppWatchError> {
        let request = HttpRequest::post(&self.auth_url, self.timeout)
            .header(headers::USERNAME, STANDARD.encode(&credentials.username))
            .header(headers::PASSWORD, STANDARD.encode(&credentials.password));

        let response = match self.dispatcher.execute(request).await {
            Ok(response) => response,
            // Server-side failures keep their status so callers may retry them
            Err(e @ AppWatchError::Status { status: 500.., .. }) => {
                tracing::warn!(
                    status = ?e.status_code(),
                    url = %self.auth_url,
                    "Token endpoint unavailable"
                );
                return Err(e);
            }
            Err(AppWatchError::Status { status, body }) => {
                tracing::warn!(status, url = %self.auth_url, "Token request rejected");
                return Err(AppWatchError::Auth(format!(
                    "token endpoint returned {status}: {body}"
                )));
            }
            Err(e) => return Err(e),
        };

        // Any other 2xx is not a token grant
        if response.status != 200 {
            tracing::warn!(status = response.status, "Token request returned unexpected status");
            return Err(AppWatchError::Auth(format!(
                "token endpoint returned {}",
                response.status
            )));
        }

        let token: TokenResponse = serde_json::from_slice(&response.body)
            .map_err(|e| AppWatchError::Parse(format!("token response: {e}")))?;

        if token.access_token.is_empty() {
            return Err(AppWatchError::Parse(
                "token response has empty access_token".to_string(),
            ));
        }

        tracing::trace!(token_type = ?token.token_type, "Token acquired");

        Ok(token.access_token)
    }
}
