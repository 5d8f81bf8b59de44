//! Configuration structures for the emulated services.
//!
//! Mirrors the layout the original deployment used: global defaults plus a
//! section per named service, with missing per-service values falling back
//! to the defaults at start time.

use retro_net::EnforceMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root configuration object, serialized to/from TOML.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Fallbacks applied when a service section omits a value
    pub defaults: DefaultSettings,
    /// Per-service settings keyed by service name
    pub services: BTreeMap<String, ServiceSettings>,
    /// Optional logging configuration
    pub logging: Option<LoggingSettings>,
}

/// Global fallbacks for service settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DefaultSettings {
    /// Address services bind to when their section has no hostname
    pub hostname: String,
    /// Connection ceiling used when a section has no max_connections
    pub max_connections: usize,
}

/// Settings for one named service. Every field is optional; the factory
/// falls back to [`DefaultSettings`] or the service's built-in default
/// port.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ServiceSettings {
    /// Bind address for this service
    pub hostname: Option<String>,
    /// TCP port; each service has a well-known default
    pub port: Option<u16>,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
    /// Admission enforcement policy
    pub enforce_mode: Option<EnforceMode>,
    /// Admission wait timeout in milliseconds (during_prepare only)
    pub wait_timeout_ms: Option<u64>,
    /// Message sent to rejected clients; empty or absent means silent
    /// rejection
    pub full_message: Option<String>,
    /// Bytes per I/O operation segment
    pub buffer_size: Option<usize>,
    /// Initial size of the concurrent accept-context pool
    pub accept_pool_size: Option<usize>,
}

/// Logging system configuration.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggingSettings {
    /// Level filter: "trace", "debug", "info", "warn" or "error"
    pub level: String,
    /// Emit JSON-formatted logs for aggregation systems
    pub json_format: bool,
}

impl Default for Config {
    /// Defaults that bring up both emulated services on their historical
    /// ports.
    fn default() -> Self {
        let mut services = BTreeMap::new();
        services.insert(
            "presence".to_string(),
            ServiceSettings {
                port: Some(29900),
                max_connections: Some(256),
                enforce_mode: Some(EnforceMode::DuringPrepare),
                wait_timeout_ms: Some(500),
                full_message: Some("The server is full!".to_string()),
                ..Default::default()
            },
        );
        services.insert(
            "master".to_string(),
            ServiceSettings {
                port: Some(28910),
                // Master connections are short lived; a small ceiling
                // with backpressure at the gate is enough.
                max_connections: Some(100),
                enforce_mode: Some(EnforceMode::BeforeAccept),
                ..Default::default()
            },
        );

        Self {
            defaults: DefaultSettings {
                hostname: "0.0.0.0".to_string(),
                max_connections: 100,
            },
            services,
            logging: Some(LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.defaults.hostname, "0.0.0.0");
        assert_eq!(config.defaults.max_connections, 100);
        assert!(config.services.contains_key("presence"));
        assert!(config.services.contains_key("master"));
        assert!(config.logging.is_some());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.defaults.hostname, deserialized.defaults.hostname);
        assert_eq!(
            config.services["presence"].port,
            deserialized.services["presence"].port
        );
        assert_eq!(
            config.services["master"].enforce_mode,
            deserialized.services["master"].enforce_mode
        );
    }

    #[test]
    fn test_toml_parsing_with_fallbacks() {
        let toml_str = r#"
[defaults]
hostname = "127.0.0.1"
max_connections = 64

[services.presence]
port = 29900
enforce_mode = "during_prepare"
full_message = "SERVER FULL"
accept_pool_size = 8

[services.master]
port = 28910
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.defaults.max_connections, 64);
        assert_eq!(config.services["presence"].port, Some(29900));
        assert_eq!(
            config.services["presence"].enforce_mode,
            Some(EnforceMode::DuringPrepare)
        );
        assert_eq!(config.services["presence"].accept_pool_size, Some(8));
        // Omitted fields fall back at start time.
        assert!(config.services["master"].max_connections.is_none());
        assert!(config.logging.is_none());
    }
}
