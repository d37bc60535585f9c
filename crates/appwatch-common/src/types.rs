//! Core types shared across AppWatch components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::consul_keys;

/// Category of configuration being watched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    /// Per-host application topology
    Topology,
    /// Cluster-wide security settings
    Security,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Topology => "topology",
            Self::Security => "security",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A topic bound to the coordination-store key that backs it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub topic: Topic,
    pub key: String,
}

impl WatchTarget {
    pub fn new(topic: Topic, key: impl Into<String>) -> Self {
        Self {
            topic,
            key: key.into(),
        }
    }

    /// Topology target for a host: `appmgr/topology/{host_id}`
    pub fn topology(host_id: &str) -> Self {
        Self::with_prefix(consul_keys::TOPOLOGY_PREFIX, host_id)
    }

    /// Topology target under a custom key prefix
    pub fn with_prefix(prefix: &str, host_id: &str) -> Self {
        Self::new(Topic::Topology, format!("{prefix}{host_id}"))
    }

    /// Security target at the default key
    pub fn security() -> Self {
        Self::new(Topic::Security, consul_keys::SECURITY_KEY)
    }
}

/// Username/password pair used for the token exchange
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Token exchange response from the application manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// A confirmed index advance on a watched key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub topic: Topic,
    pub key: String,
    pub previous_index: u64,
    pub index: u64,
    /// New value, `None` when the key was deleted
    pub value: Option<Vec<u8>>,
}

impl ChangeEvent {
    pub fn value_lossy(&self) -> Option<String> {
        self.value
            .as_deref()
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }
}

/// What a watch task is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Starting,
    Seeding,
    Polling,
    Notifying,
    BackingOff,
    /// Topic is present but not actively watched
    Idle,
    Stopped,
}

impl Default for LoopPhase {
    fn default() -> Self {
        Self::Starting
    }
}

/// Published view of one watch task, served by the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicStatus {
    pub topic: Topic,
    pub key: String,
    pub phase: LoopPhase,
    pub last_index: u64,
    pub key_present: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_change_at: Option<DateTime<Utc>>,

    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub store_errors: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TopicStatus {
    pub fn new(target: &WatchTarget) -> Self {
        Self {
            topic: target.topic,
            key: target.key.clone(),
            phase: LoopPhase::Starting,
            last_index: 0,
            key_present: false,
            last_change_at: None,
            notifications_sent: 0,
            notifications_failed: 0,
            store_errors: 0,
            last_error: None,
        }
    }
}
