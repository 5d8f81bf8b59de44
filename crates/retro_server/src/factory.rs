//! Factory that creates and controls the named service instances.
//!
//! Each emulated service gets its own independent [`TcpServer`] on its own
//! port; the factory resolves per-service configuration (falling back to
//! global defaults and the service's well-known port), starts and stops
//! instances by name, and disposes everything on the way out.

use crate::config::{Config, ServiceSettings};
use crate::handlers::{MasterHandler, PresenceHandler};
use anyhow::{anyhow, Result};
use retro_net::{EngineConfig, EnforceMode, TcpServer};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Well-known default port for the presence/login service.
const PRESENCE_DEFAULT_PORT: u16 = 29900;
/// Well-known default port for the master/server-list service.
const MASTER_DEFAULT_PORT: u16 = 28910;

struct Entry {
    server: Arc<TcpServer>,
    settings: ServiceSettings,
    default_port: u16,
}

/// Creates and owns the emulated service instances.
pub struct ServerFactory {
    servers: HashMap<String, Entry>,
    defaults: crate::config::DefaultSettings,
}

impl ServerFactory {
    /// Builds every known service from the configuration. Nothing is bound
    /// until [`start_server`] runs.
    ///
    /// [`start_server`]: ServerFactory::start_server
    pub fn create(config: &Config) -> Self {
        let mut servers = HashMap::new();

        let presence_settings = config
            .services
            .get("presence")
            .cloned()
            .unwrap_or_default();
        let presence = PresenceHandler::new();
        let presence_server = Arc::new(TcpServer::new(
            engine_config(&presence_settings),
            Arc::new(presence.clone()),
        ));
        presence.bind_server(&presence_server);
        servers.insert(
            "presence".to_string(),
            Entry {
                server: presence_server,
                settings: presence_settings,
                default_port: PRESENCE_DEFAULT_PORT,
            },
        );

        let master_settings = config.services.get("master").cloned().unwrap_or_default();
        let master = MasterHandler::new();
        let master_server = Arc::new(TcpServer::new(
            engine_config(&master_settings),
            Arc::new(master.clone()),
        ));
        master.bind_server(&master_server);
        servers.insert(
            "master".to_string(),
            Entry {
                server: master_server,
                settings: master_settings,
                default_port: MASTER_DEFAULT_PORT,
            },
        );

        for name in config.services.keys() {
            if !servers.contains_key(name.as_str()) {
                warn!(service = %name, "unknown service in configuration; ignoring");
            }
        }

        Self {
            servers,
            defaults: config.defaults.clone(),
        }
    }

    /// Names of every service the factory can start.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Starts the named service, resolving hostname, port, and ceiling
    /// from its settings with global fallbacks. Bind failures propagate;
    /// they are fatal for that instance.
    pub fn start_server(&self, name: &str) -> Result<SocketAddr> {
        let name = name.to_lowercase();
        let entry = self
            .servers
            .get(&name)
            .ok_or_else(|| anyhow!("unknown service: {name}"))?;

        let hostname = entry
            .settings
            .hostname
            .as_deref()
            .unwrap_or(&self.defaults.hostname);
        let port = entry.settings.port.unwrap_or(entry.default_port);
        let max_connections = entry
            .settings
            .max_connections
            .unwrap_or(self.defaults.max_connections);

        let addr: SocketAddr = format!("{hostname}:{port}")
            .parse()
            .map_err(|e| anyhow!("invalid endpoint {hostname}:{port} for {name}: {e}"))?;

        info!("Starting {} server at {}...", name, addr);
        info!(
            "Maximum connections allowed for server {} are {}.",
            name, max_connections
        );

        let bound = entry.server.start(addr, max_connections)?;
        Ok(bound)
    }

    /// Stops the named service. Unknown names are ignored.
    pub fn stop_server(&self, name: &str) {
        if let Some(entry) = self.servers.get(&name.to_lowercase()) {
            entry.server.stop();
        }
    }

    /// Stops every service.
    pub fn stop_all(&self) {
        for entry in self.servers.values() {
            entry.server.stop();
        }
    }

    /// Whether the named service is currently running.
    pub fn is_server_running(&self, name: &str) -> bool {
        self.servers
            .get(&name.to_lowercase())
            .map(|e| e.server.is_running())
            .unwrap_or(false)
    }

    /// Whether any service is running.
    pub fn is_running(&self) -> bool {
        self.servers.values().any(|e| e.server.is_running())
    }

    /// Stops and disposes every service instance.
    pub fn dispose(&self) {
        self.stop_all();
        for entry in self.servers.values() {
            entry.server.dispose();
        }
    }
}

/// Maps a service's settings onto the engine's tuning options.
fn engine_config(settings: &ServiceSettings) -> EngineConfig {
    let base = EngineConfig::default();
    EngineConfig {
        buffer_size: settings.buffer_size.unwrap_or(base.buffer_size),
        accept_pool_size: settings.accept_pool_size.unwrap_or(base.accept_pool_size),
        enforce_mode: settings.enforce_mode.unwrap_or(EnforceMode::BeforeAccept),
        wait_timeout: settings
            .wait_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(base.wait_timeout),
        full_message: settings.full_message.clone().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn localhost_config() -> Config {
        let mut config = Config::default();
        config.defaults.hostname = "127.0.0.1".to_string();
        // Ephemeral ports so tests never collide.
        for settings in config.services.values_mut() {
            settings.port = Some(0);
        }
        config
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn factory_starts_and_stops_named_services() {
        let factory = ServerFactory::create(&localhost_config());
        assert_eq!(factory.names(), vec!["master", "presence"]);
        assert!(!factory.is_running());

        let addr = factory.start_server("presence").expect("presence starts");
        assert_ne!(addr.port(), 0);
        assert!(factory.is_server_running("presence"));
        assert!(!factory.is_server_running("master"));
        assert!(factory.is_running());

        // Name matching is case-insensitive, as the original operators
        // expected.
        assert!(factory.is_server_running("PRESENCE"));

        factory.stop_server("presence");
        assert!(!factory.is_running());
        factory.dispose();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_service_is_rejected() {
        let factory = ServerFactory::create(&localhost_config());
        assert!(factory.start_server("chat").is_err());
        factory.dispose();
    }

    #[test]
    fn engine_config_applies_service_overrides() {
        let settings = ServiceSettings {
            buffer_size: Some(512),
            accept_pool_size: Some(8),
            wait_timeout_ms: Some(250),
            ..Default::default()
        };
        let engine = engine_config(&settings);
        assert_eq!(engine.buffer_size, 512);
        assert_eq!(engine.accept_pool_size, 8);
        assert_eq!(engine.wait_timeout, Duration::from_millis(250));

        // Omitted fields keep the engine defaults.
        let defaults = engine_config(&ServiceSettings::default());
        assert_eq!(defaults.accept_pool_size, EngineConfig::default().accept_pool_size);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispose_is_idempotent() {
        let factory = ServerFactory::create(&localhost_config());
        factory.start_server("master").expect("master starts");
        factory.dispose();
        factory.dispose();
        assert!(!factory.is_running());
    }
}
