//! Coordination store access.
//!
//! The watch loops only ever read single keys, with or without a blocking
//! wait, so the seam is a single `get` operation. `ConsulClient` is the
//! production implementation.

mod consul;

pub use consul::{ConsulClient, ConsulConfig};

use appwatch_common::AppWatchError;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

/// Blocking query parameters. `wait_index == 0` means a plain read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub wait_index: u64,
    pub wait_time: Option<Duration>,
}

impl QueryOptions {
    pub fn blocking(wait_index: u64, wait_time: Duration) -> Self {
        Self {
            wait_index,
            wait_time: Some(wait_time),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.wait_index > 0
    }
}

/// A stored key and its raw value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Option<Vec<u8>>,
    pub modify_index: u64,
}

/// Response metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryMeta {
    /// Index of the returned data, used as the next `wait_index`
    pub last_index: u64,
}

/// Result of a `get`: the pair (absent if the key does not exist) and its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvResponse {
    pub pair: Option<KvPair>,
    pub meta: QueryMeta,
}

impl KvResponse {
    pub fn value(&self) -> Option<Vec<u8>> {
        self.pair.as_ref().and_then(|p| p.value.clone())
    }
}

/// Read access to the key-value store. Implementations must allow concurrent
/// `get` calls on different keys.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str, options: QueryOptions) -> Result<KvResponse, AppWatchError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted store for driving whole watch loops in tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::Notify;
    use tokio::time::Instant;

    /// One recorded `get` call
    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub key: String,
        pub options: QueryOptions,
        pub at: Instant,
    }

    /// Replays canned responses in order; once exhausted every call parks forever
    /// and `exhausted` is notified.
    pub struct ScriptedStore {
        script: Mutex<VecDeque<Result<KvResponse, AppWatchError>>>,
        calls: Mutex<Vec<RecordedCall>>,
        pub exhausted: Notify,
    }

    impl ScriptedStore {
        pub fn new(script: Vec<Result<KvResponse, AppWatchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                exhausted: Notify::new(),
            }
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    pub fn found(key: &str, index: u64, value: &str) -> Result<KvResponse, AppWatchError> {
        Ok(KvResponse {
            pair: Some(KvPair {
                key: key.to_string(),
                value: Some(value.as_bytes().to_vec()),
                modify_index: index,
            }),
            meta: QueryMeta { last_index: index },
        })
    }

    pub fn missing(index: u64) -> Result<KvResponse, AppWatchError> {
        Ok(KvResponse {
            pair: None,
            meta: QueryMeta { last_index: index },
        })
    }

    #[async_trait]
    impl KvStore for ScriptedStore {
        async fn get(&self, key: &str, options: QueryOptions) -> Result<KvResponse, AppWatchError> {
            self.calls.lock().unwrap().push(RecordedCall {
                key: key.to_string(),
                options,
                at: Instant::now(),
            });

            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(response) => response,
                None => {
                    self.exhausted.notify_one();
                    std::future::pending().await
                }
            }
        }
    }
}
