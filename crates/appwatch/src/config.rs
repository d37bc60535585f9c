//! Configuration management for AppWatch.

use anyhow::{Context, Result, bail};
use appwatch_common::constants::{
    DEFAULT_BACKOFF_SECS, DEFAULT_CONSUL_ADDR, DEFAULT_MANAGEMENT_URL, DEFAULT_WAIT_SECS,
    MAX_TIMEOUT_MARGIN_SECS, MAX_WAIT_SECS, NOTIFY_TIMEOUT_SECS, TOKEN_TIMEOUT_SECS, consul_keys,
};
use appwatch_common::{Credentials, Topic, WatchTarget};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::http::TlsPolicy;
use crate::notify::NotifierConfig;
use crate::store::ConsulConfig;
use crate::supervisor::RestartPolicy;
use crate::watch::WatchSettings;

/// Environment prefix for nested overrides, e.g. `APPWATCH__MANAGEMENT__PASSWORD`
const ENV_PREFIX: &str = "APPWATCH";

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    /// Host identifier used in the topology key (system hostname if unset)
    #[serde(default)]
    pub host_id: Option<String>,

    #[serde(default)]
    pub consul: ConsulSection,

    #[serde(default)]
    pub management: ManagementSection,

    #[serde(default)]
    pub watch: WatchSection,

    #[serde(default)]
    pub supervisor: SupervisorSection,

    #[serde(default)]
    pub status: StatusSection,
}

/// Coordination store settings
#[derive(Debug, Clone, Deserialize)]
pub struct ConsulSection {
    /// Consul HTTP address (`host:port` or URL)
    #[serde(default = "default_consul_addr")]
    pub address: String,

    /// ACL token
    #[serde(default)]
    pub token: Option<String>,

    /// Blocking query wait time in seconds
    #[serde(default = "default_wait")]
    pub wait_secs: u64,

    /// Extra HTTP deadline on top of the wait time
    #[serde(default = "default_timeout_margin")]
    pub timeout_margin_secs: u64,
}

impl Default for ConsulSection {
    fn default() -> Self {
        Self {
            address: default_consul_addr(),
            token: None,
            wait_secs: default_wait(),
            timeout_margin_secs: default_timeout_margin(),
        }
    }
}

/// Application manager API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ManagementSection {
    #[serde(default = "default_management_url")]
    pub base_url: String,

    /// Token endpoint path, empty means the base URL itself
    #[serde(default)]
    pub auth_path: String,

    /// Notification endpoint path, empty means the base URL itself
    #[serde(default)]
    pub notify_path: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_token_timeout")]
    pub token_timeout_secs: u64,

    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_secs: u64,

    /// Skip TLS certificate validation (self-signed internal endpoints)
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Carry topic, key, index and value in the notification body
    #[serde(default)]
    pub include_value: bool,

    /// Attempts per change event (1 = at-most-once)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

impl Default for ManagementSection {
    fn default() -> Self {
        Self {
            base_url: default_management_url(),
            auth_path: String::new(),
            notify_path: String::new(),
            username: default_username(),
            password: String::new(),
            token_timeout_secs: default_token_timeout(),
            notify_timeout_secs: default_notify_timeout(),
            insecure_skip_verify: false,
            include_value: false,
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

/// Watch loop settings
#[derive(Debug, Clone, Deserialize)]
pub struct WatchSection {
    /// Sleep after a failed store read
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,

    #[serde(default = "default_topology_prefix")]
    pub topology_prefix: String,

    #[serde(default = "default_security_key")]
    pub security_key: String,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            backoff_secs: default_backoff(),
            topology_prefix: default_topology_prefix(),
            security_key: default_security_key(),
        }
    }
}

/// Task supervision settings
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSection {
    #[serde(default)]
    pub policy: RestartPolicy,

    /// Delay before respawning a task under `restart-one`
    #[serde(default = "default_backoff")]
    pub restart_delay_secs: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            policy: RestartPolicy::default(),
            restart_delay_secs: default_backoff(),
        }
    }
}

/// Status endpoint settings
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StatusSection {
    /// Listen address, disabled when unset
    #[serde(default)]
    pub listen_addr: Option<String>,
}

// Default value functions
fn default_consul_addr() -> String { DEFAULT_CONSUL_ADDR.to_string() }
fn default_management_url() -> String { DEFAULT_MANAGEMENT_URL.to_string() }
fn default_username() -> String { "admin".to_string() }
fn default_wait() -> u64 { DEFAULT_WAIT_SECS }
fn default_timeout_margin() -> u64 { 10 }
fn default_token_timeout() -> u64 { TOKEN_TIMEOUT_SECS }
fn default_notify_timeout() -> u64 { NOTIFY_TIMEOUT_SECS }
fn default_max_attempts() -> u32 { 1 }
fn default_retry_delay() -> u64 { 5 }
fn default_backoff() -> u64 { DEFAULT_BACKOFF_SECS }
fn default_topology_prefix() -> String { consul_keys::TOPOLOGY_PREFIX.to_string() }
fn default_security_key() -> String { consul_keys::SECURITY_KEY.to_string() }

impl AppConfig {
    /// Load configuration from file and environment, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut builder = config::Config::builder();

        if Path::new(config_path).exists() {
            builder = builder.add_source(config::File::with_name(config_path));
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load config")?;

        let mut config: AppConfig = settings
            .try_deserialize()
            .context("Failed to parse config")?;

        // Apply CLI overrides
        if let Some(ref addr) = args.consul_addr {
            config.consul.address = addr.clone();
        }
        if let Some(ref host_id) = args.host_id {
            config.host_id = Some(host_id.clone());
        }
        if let Some(ref status_addr) = args.status_addr {
            config.status.listen_addr = Some(status_addr.clone());
        }

        Ok(config)
    }

    /// Reject settings that would only fail later at runtime
    pub fn validate(&self) -> Result<()> {
        if self.management.password.is_empty() {
            bail!("management.password is not set (APPWATCH__MANAGEMENT__PASSWORD)");
        }
        if self.management.max_attempts == 0 {
            bail!("management.max_attempts must be at least 1");
        }
        if !(1..=MAX_WAIT_SECS).contains(&self.consul.wait_secs) {
            bail!(
                "consul.wait_secs must be between 1 and {MAX_WAIT_SECS}, got {}",
                self.consul.wait_secs
            );
        }
        if self.consul.timeout_margin_secs > MAX_TIMEOUT_MARGIN_SECS {
            bail!(
                "consul.timeout_margin_secs must be at most {MAX_TIMEOUT_MARGIN_SECS}, got {}",
                self.consul.timeout_margin_secs
            );
        }
        reqwest::Url::parse(&self.management.base_url)
            .with_context(|| format!("Invalid management.base_url {}", self.management.base_url))?;
        Ok(())
    }

    /// Configured host identifier, else the system hostname. Empty is fatal.
    pub fn resolve_host_id(&self) -> Result<String> {
        pick_host_id(self.host_id.as_deref(), system_hostname())
    }

    /// Topology and security targets for this host
    pub fn targets(&self, host_id: &str) -> Vec<WatchTarget> {
        vec![
            WatchTarget::with_prefix(&self.watch.topology_prefix, host_id),
            WatchTarget::new(Topic::Security, self.watch.security_key.clone()),
        ]
    }

    pub fn consul_config(&self) -> ConsulConfig {
        ConsulConfig {
            address: self.consul.address.clone(),
            token: self.consul.token.clone(),
            timeout_margin: Duration::from_secs(self.consul.timeout_margin_secs),
        }
    }

    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            wait_time: Duration::from_secs(self.consul.wait_secs),
            backoff: Duration::from_secs(self.watch.backoff_secs),
        }
    }
}

impl ManagementSection {
    pub fn auth_url(&self) -> String {
        join_url(&self.base_url, &self.auth_path)
    }

    pub fn notify_url(&self) -> String {
        join_url(&self.base_url, &self.notify_path)
    }

    pub fn tls_policy(&self) -> TlsPolicy {
        TlsPolicy {
            insecure_skip_verify: self.insecure_skip_verify,
        }
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_secs)
    }

    pub fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            notify_url: self.notify_url(),
            credentials: Credentials::new(&self.username, &self.password),
            timeout: Duration::from_secs(self.notify_timeout_secs),
            include_value: self.include_value,
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }
}

fn pick_host_id(configured: Option<&str>, system: Option<String>) -> Result<String> {
    let host = configured
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .or_else(|| system.map(|h| h.trim().to_string()))
        .filter(|h| !h.is_empty());

    match host {
        Some(host) => Ok(host),
        None => bail!("Could not resolve host identifier; set host_id or APPWATCH_HOST_ID"),
    }
}

fn system_hostname() -> Option<String> {
    if let Ok(host) = std::env::var("HOSTNAME") {
        if !host.trim().is_empty() {
            return Some(host);
        }
    }
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .find_map(|path| std::fs::read_to_string(path).ok())
        .filter(|h| !h.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AppConfig {
        let mut config = AppConfig::default();
        config.management.password = "Admin123".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.consul.address, DEFAULT_CONSUL_ADDR);
        assert_eq!(config.consul.wait_secs, 30);
        assert_eq!(config.watch.backoff_secs, 60);
        assert_eq!(config.management.token_timeout_secs, 60);
        assert_eq!(config.management.notify_timeout_secs, 30);
        assert_eq!(config.management.max_attempts, 1);
        assert!(!config.management.insecure_skip_verify);
        assert_eq!(config.supervisor.policy, RestartPolicy::CrashTogether);
        assert!(config.status.listen_addr.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());
        assert!(AppConfig::default().validate().is_err());

        let mut config = valid();
        config.consul.wait_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.management.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.management.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.consul.timeout_margin_secs = u64::MAX;
        assert!(config.validate().is_err());
        config.consul.timeout_margin_secs = MAX_TIMEOUT_MARGIN_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_endpoint_urls() {
        let mut section = ManagementSection::default();
        section.base_url = "https://10.1.241.54:6060/".to_string();
        assert_eq!(section.auth_url(), "https://10.1.241.54:6060/");

        section.auth_path = "/appmgr/login".to_string();
        section.notify_path = "appmgr/consul/notify".to_string();
        assert_eq!(section.auth_url(), "https://10.1.241.54:6060/appmgr/login");
        assert_eq!(
            section.notify_url(),
            "https://10.1.241.54:6060/appmgr/consul/notify"
        );
    }

    #[test]
    fn test_host_id_resolution() {
        assert_eq!(pick_host_id(Some("host1"), None).unwrap(), "host1");
        assert_eq!(
            pick_host_id(Some("  "), Some("node7\n".to_string())).unwrap(),
            "node7"
        );
        assert_eq!(pick_host_id(None, Some("node7".to_string())).unwrap(), "node7");
        assert!(pick_host_id(None, None).is_err());
        assert!(pick_host_id(Some(""), Some("   ".to_string())).is_err());
    }

    #[test]
    fn test_targets() {
        let targets = valid().targets("host1");
        assert_eq!(targets[0], WatchTarget::topology("host1"));
        assert_eq!(targets[1], WatchTarget::security());
    }

    #[test]
    fn test_parse_toml() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                host_id = "host1"

                [consul]
                address = "10.1.241.54:8500"
                wait_secs = 10

                [management]
                base_url = "https://10.1.241.54:6060"
                password = "Admin123"
                insecure_skip_verify = true
                max_attempts = 3

                [supervisor]
                policy = "restart-one"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let config: AppConfig = settings.try_deserialize().unwrap();
        assert_eq!(config.host_id.as_deref(), Some("host1"));
        assert_eq!(config.consul.wait_secs, 10);
        assert_eq!(config.watch_settings().wait_time, Duration::from_secs(10));
        assert!(config.management.tls_policy().insecure_skip_verify);
        assert_eq!(config.management.notifier_config().max_attempts, 3);
        assert_eq!(config.supervisor.policy, RestartPolicy::RestartOne);
        assert_eq!(config.watch.security_key, "appmgr/security");
    }
}
