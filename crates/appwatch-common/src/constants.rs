//! Shared constants for AppWatch components.

/// Default Consul HTTP address (overridden by `CONSUL_HTTP_ADDR`)
pub const DEFAULT_CONSUL_ADDR: &str = "127.0.0.1:8500";

/// Default application manager base URL
pub const DEFAULT_MANAGEMENT_URL: &str = "https://127.0.0.1:6060";

/// Default long-poll wait time for blocking queries (seconds)
pub const DEFAULT_WAIT_SECS: u64 = 30;

/// Upper bound Consul accepts for a blocking query wait (10 minutes)
pub const MAX_WAIT_SECS: u64 = 600;

/// Upper bound for the extra HTTP deadline on top of a blocking query
pub const MAX_TIMEOUT_MARGIN_SECS: u64 = 300;

/// Fixed sleep after a failed store query (seconds)
pub const DEFAULT_BACKOFF_SECS: u64 = 60;

/// Token exchange timeout (seconds)
pub const TOKEN_TIMEOUT_SECS: u64 = 60;

/// Notification call timeout (seconds)
pub const NOTIFY_TIMEOUT_SECS: u64 = 30;

/// Number of rotated log files kept on disk
pub const DEFAULT_LOG_FILES: usize = 5;

/// Consul KV key layout
pub mod consul_keys {
    /// Per-host topology: appmgr/topology/{host}
    pub const TOPOLOGY_PREFIX: &str = "appmgr/topology/";

    /// Cluster-wide security document
    pub const SECURITY_KEY: &str = "appmgr/security";

    /// KV endpoint under the Consul HTTP API
    pub const KV_API_PATH: &str = "/v1/kv/";
}

/// HTTP header names
pub mod headers {
    /// Raft index of the returned data
    pub const X_CONSUL_INDEX: &str = "X-Consul-Index";

    /// Consul ACL token
    pub const X_CONSUL_TOKEN: &str = "X-Consul-Token";

    /// Base64 encoded user name for the token exchange
    pub const USERNAME: &str = "username";

    /// Base64 encoded password for the token exchange
    pub const PASSWORD: &str = "password";
}
