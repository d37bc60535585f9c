//! Change notification to the application manager.
//!
//! Each attempt fetches a fresh token and POSTs to the notify endpoint.
//! With the default single attempt delivery is at-most-once per index
//! change; `max_attempts` bounds any retries. Only errors that
//! `AppWatchError::is_retryable` accepts are tried again, so rejected
//! credentials never cause a second login.

use appwatch_common::{AppWatchError, ChangeEvent, Credentials};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::time::Duration;

use crate::http::{HttpDispatcher, HttpRequest, TokenBroker};

#[cfg(test)]
use mockall::automock;

/// Receives confirmed index changes from the watch loops
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn notify(&self, event: &ChangeEvent) -> Result<(), AppWatchError>;
}

/// Notification settings
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub notify_url: String,
    pub credentials: Credentials,
    pub timeout: Duration,
    /// Send `{topic, key, index, value}` instead of an empty object
    pub include_value: bool,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

/// Token-authenticated notifier for the application manager
pub struct AppMgrNotifier {
    broker: TokenBroker,
    dispatcher: HttpDispatcher,
    config: NotifierConfig,
}

impl AppMgrNotifier {
    pub fn new(broker: TokenBroker, dispatcher: HttpDispatcher, config: NotifierConfig) -> Self {
        Self {
            broker,
            dispatcher,
            config,
        }
    }

    fn body(&self, event: &ChangeEvent) -> Map<String, Value> {
        if !self.config.include_value {
            return Map::new();
        }

        let mut body = Map::new();
        body.insert("topic".into(), json!(event.topic));
        body.insert("key".into(), json!(event.key));
        body.insert("index".into(), json!(event.index));
        body.insert("value".into(), json!(event.value_lossy()));
        body
    }

    async fn attempt(&self, event: &ChangeEvent) -> Result<(), AppWatchError> {
        let token = self.broker.acquire_token(&self.config.credentials).await?;

        let request = HttpRequest::post(&self.config.notify_url, self.config.timeout)
            .bearer(token)
            .json(self.body(event));

        let response = self.dispatcher.execute(request).await?;
        if response.status != 200 {
            return Err(AppWatchError::Status {
                status: response.status,
                body: response.text(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl ChangeNotifier for AppMgrNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<(), AppWatchError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(event).await {
                Ok(()) => {
                    tracing::info!(
                        topic = %event.topic,
                        index = event.index,
                        attempt,
                        "📣 Application manager notified"
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        topic = %event.topic,
                        index = event.index,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Notification attempt failed"
                    );

                    if attempt >= max_attempts || !e.is_retryable() {
                        return Err(e);
                    }
                }
            }

            attempt += 1;
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }
}
