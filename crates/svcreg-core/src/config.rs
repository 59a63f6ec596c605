//! Configuration for the svcreg registry.
//!
//! Supports:
//! - Loading from YAML files
//! - Environment variable overrides (`SVCREG__*`) through the `config` crate
//! - Validation of all settings
//!
//! # Examples
//!
//! ```
//! use svcreg_core::config::RegistryConfig;
//!
//! let config = RegistryConfig::from_yaml("default_domain: team-a\ntimeout_ms: 250\n").unwrap();
//! assert_eq!(config.default_domain, "team-a");
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Domain every registration is mirrored into.
pub const GLOBAL_DOMAIN: &str = "global";

/// Domain selector that resolves to [`GLOBAL_DOMAIN`].
pub const WILDCARD_DOMAIN: &str = "*";

/// Registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Domain used when an operation does not name one
    #[serde(default = "default_domain")]
    pub default_domain: String,

    /// How long queries collect answers (milliseconds)
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Per-watcher event queue capacity
    #[serde(default = "default_queue_capacity")]
    pub watch_queue_capacity: usize,

    /// Capacity of the shared listener channel
    #[serde(default = "default_queue_capacity")]
    pub listener_queue_capacity: usize,

    /// Delay before restarting a listen call that failed (milliseconds)
    #[serde(default = "default_restart_backoff")]
    pub listener_restart_backoff_ms: u64,

    /// Multicast transport settings
    #[serde(default)]
    pub mdns: MdnsConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_domain: default_domain(),
            timeout_ms: default_timeout(),
            watch_queue_capacity: default_queue_capacity(),
            listener_queue_capacity: default_queue_capacity(),
            listener_restart_backoff_ms: default_restart_backoff(),
            mdns: MdnsConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration from a file layered with `SVCREG__*` environment
    /// variables, e.g. `SVCREG__DEFAULT_DOMAIN=team-a`.
    pub fn from_config_builder<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("SVCREG")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let config: Self = config.try_deserialize().map_err(|e| ConfigError::InvalidFormat {
            reason: e.to_string(),
        })?;

        debug!(
            path = %path.display(),
            default_domain = %config.default_domain,
            timeout_ms = config.timeout_ms,
            "Registry configuration loaded"
        );
        Ok(config)
    }

    /// Returns the query timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Returns the listener restart backoff as a Duration
    pub fn listener_restart_backoff(&self) -> Duration {
        Duration::from_millis(self.listener_restart_backoff_ms)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.default_domain.is_empty() {
            return Err(ConfigError::invalid_value("default_domain", "cannot be empty").into());
        }

        if self.default_domain == WILDCARD_DOMAIN || self.default_domain == GLOBAL_DOMAIN {
            return Err(ConfigError::invalid_value(
                "default_domain",
                format!("'{}' is reserved", self.default_domain),
            )
            .into());
        }

        if self.timeout_ms == 0 {
            return Err(ConfigError::invalid_value("timeout_ms", "cannot be 0").into());
        }

        if self.watch_queue_capacity == 0 {
            return Err(ConfigError::invalid_value("watch_queue_capacity", "cannot be 0").into());
        }

        if self.listener_queue_capacity == 0 {
            return Err(
                ConfigError::invalid_value("listener_queue_capacity", "cannot be 0").into(),
            );
        }

        self.mdns.validate()
    }
}

/// Settings for the `mdns-sd` backed transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdnsConfig {
    /// DNS-SD service type shared by every registry record
    #[serde(default = "default_service_type")]
    pub service_type: String,

    /// Host name to advertise (defaults to the machine host name)
    #[serde(default)]
    pub host_name: Option<String>,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            host_name: None,
        }
    }
}

impl MdnsConfig {
    pub fn validate(&self) -> Result<()> {
        let ty = &self.service_type;
        let valid = ty.starts_with('_')
            && (ty.ends_with("._tcp.local.") || ty.ends_with("._udp.local."));
        if !valid {
            return Err(ConfigError::invalid_value(
                "mdns.service_type",
                format!("'{}' is not of the form _name._tcp.local.", ty),
            )
            .into());
        }
        Ok(())
    }
}

fn default_domain() -> String {
    "micro".to_string()
}

fn default_timeout() -> u64 {
    100
}

fn default_queue_capacity() -> usize {
    32
}

fn default_restart_backoff() -> u64 {
    500
}

fn default_service_type() -> String {
    "_micro._tcp.local.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.default_domain, "micro");
        assert_eq!(config.timeout(), Duration::from_millis(100));
        assert_eq!(config.watch_queue_capacity, 32);
        assert_eq!(config.mdns.service_type, "_micro._tcp.local.");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
default_domain: team-a
mdns:
  host_name: box.local.
"#;
        let config = RegistryConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.default_domain, "team-a");
        assert_eq!(config.timeout_ms, 100);
        assert_eq!(config.mdns.host_name.as_deref(), Some("box.local."));
        assert_eq!(config.mdns.service_type, "_micro._tcp.local.");
    }

    #[test]
    fn test_invalid_yaml() {
        let err = RegistryConfig::from_yaml("timeout_ms: [").unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Config(ConfigError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_reserved_default_domain() {
        for domain in [GLOBAL_DOMAIN, WILDCARD_DOMAIN, ""] {
            let config = RegistryConfig {
                default_domain: domain.to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{domain:?} should be rejected");
        }
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = RegistryConfig {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RegistryConfig {
            watch_queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_service_type_validation() {
        let mut config = MdnsConfig::default();
        assert!(config.validate().is_ok());

        config.service_type = "micro.local.".to_string();
        assert!(config.validate().is_err());
    }
}
