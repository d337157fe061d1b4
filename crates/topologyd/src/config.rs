//! Configuration file support for topologyd
//!
//! Loads and validates topologyd configuration from TOML files.
//! Default location: /etc/topologyd/topologyd.toml

use crate::error::{Result, TopologyError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use topo_common::PollPolicy;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/topologyd/topologyd.toml";

/// Environment override for the link-up debounce window
pub const LINK_UP_TIMER_ENV: &str = "TOPOLOGYD_LINK_UP_TIMER_SECS";

/// Engine behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Seconds a link must stay up before link-up is notified
    #[serde(default = "default_link_up_timer")]
    pub link_up_timer_secs: u64,

    /// Newly discovered switches, interfaces and links start enabled
    #[serde(default)]
    pub enable_entities_by_default: bool,
}

/// Persistence collaborator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// JSON document holding the snapshot and metadata namespaces
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Startup snapshot fetch attempts
    #[serde(default = "default_bootstrap_attempts")]
    pub bootstrap_attempts: u32,

    /// Delay between startup fetch attempts in milliseconds
    #[serde(default = "default_bootstrap_interval")]
    pub bootstrap_interval_ms: u64,
}

/// Event ingress settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressConfig {
    /// TCP address accepting newline-delimited JSON event frames
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Disables the listener; the engine then only restores and persists
    #[serde(default = "default_ingress_enabled")]
    pub enabled: bool,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of compact text
    #[serde(default)]
    pub json: bool,
}

/// Complete topologyd configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologydConfig {
    #[serde(default)]
    pub topology: TopologyConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub ingress: IngressConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_link_up_timer() -> u64 {
    10
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/var/lib/topologyd/topology.json")
}

fn default_bootstrap_attempts() -> u32 {
    20
}

fn default_bootstrap_interval() -> u64 {
    100
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv6Addr::LOCALHOST, 7411))
}

fn default_ingress_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            link_up_timer_secs: default_link_up_timer(),
            enable_entities_by_default: false,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            bootstrap_attempts: default_bootstrap_attempts(),
            bootstrap_interval_ms: default_bootstrap_interval(),
        }
    }
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enabled: default_ingress_enabled(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl TopologydConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| {
                TopologyError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TopologyError::Config(e.to_string()))
    }

    /// Applies `TOPOLOGYD_LINK_UP_TIMER_SECS` if set to a valid number
    pub fn apply_env_overrides(&mut self) {
        if let Some(secs) = std::env::var(LINK_UP_TIMER_ENV)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.topology.link_up_timer_secs = secs;
        }
    }

    /// Debounce window as Duration
    pub fn link_up_timer(&self) -> Duration {
        Duration::from_secs(self.topology.link_up_timer_secs)
    }

    /// Startup snapshot polling policy
    pub fn bootstrap_policy(&self) -> PollPolicy {
        PollPolicy::new(
            self.persistence.bootstrap_attempts,
            Duration::from_millis(self.persistence.bootstrap_interval_ms),
        )
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.persistence.bootstrap_attempts == 0 {
            return Err(TopologyError::Config(
                "bootstrap_attempts must be > 0".to_string(),
            ));
        }

        if self.persistence.state_file.as_os_str().is_empty() {
            return Err(TopologyError::Config(
                "state_file must not be empty".to_string(),
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(TopologyError::Config("log level must not be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = TopologydConfig::default();
        assert_eq!(config.topology.link_up_timer_secs, 10);
        assert!(!config.topology.enable_entities_by_default);
        assert_eq!(config.persistence.bootstrap_attempts, 20);
        assert_eq!(config.persistence.bootstrap_interval_ms, 100);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.link_up_timer(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TopologydConfig::from_toml(
            r#"
            [topology]
            link_up_timer_secs = 3

            [ingress]
            listen_addr = "127.0.0.1:9000"

            [logging]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.topology.link_up_timer_secs, 3);
        assert_eq!(config.ingress.listen_addr, SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert!(config.ingress.enabled);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.persistence, PersistenceConfig::default());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TopologydConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, TopologydConfig::default());
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "topology = 12").unwrap();
        let err = TopologydConfig::load_or_default(&path).unwrap_err();
        assert!(matches!(err, TopologyError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = TopologydConfig::default();
        config.persistence.bootstrap_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bootstrap_policy() {
        let policy = TopologydConfig::default().bootstrap_policy();
        assert_eq!(policy.attempts, 20);
        assert_eq!(policy.interval, Duration::from_millis(100));
    }
}
