//! Configuration module for the legacy game-service emulator.
//!
//! Handles command-line arguments and the TOML configuration file the
//! service factory reads its per-server settings from.

pub mod args;
pub mod settings;

pub use args::Args;
pub use settings::{Config, DefaultSettings, LoggingSettings, ServiceSettings};

use anyhow::{Context, Result};

/// Load configuration from file or create a default configuration.
///
/// If the file at `args.config` doesn't exist, a default configuration
/// file is written there and its settings returned. Runs before the
/// logging stack is up, so outcomes are reported through the returned
/// value only; the caller logs them once a subscriber is installed.
pub async fn load_config(args: &Args) -> Result<Config> {
    if args.config.exists() {
        let config_str = tokio::fs::read_to_string(&args.config).await?;
        toml::de::from_str::<Config>(&config_str)
            .with_context(|| format!("failed to parse config file {}", args.config.display()))
    } else {
        let default_config = Config::default();
        let config_str = toml::to_string_pretty(&default_config)?;
        tokio::fs::write(&args.config, config_str).await?;
        Ok(default_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_load_config_creates_default() {
        let temp_file = NamedTempFile::new().unwrap();
        let args = Args {
            config: temp_file.path().to_path_buf(),
            ..Default::default()
        };

        // Delete the file to exercise default creation.
        drop(temp_file);

        let config = load_config(&args).await.unwrap();
        assert_eq!(config.defaults.hostname, "0.0.0.0");
        assert!(args.config.exists());

        std::fs::remove_file(&args.config).ok();
    }

    #[tokio::test]
    async fn test_load_config_existing() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let config_content = r#"
[defaults]
hostname = "127.0.0.1"
max_connections = 42

[services.master]
port = 28910
        "#;

        temp_file.write_all(config_content.as_bytes()).unwrap();

        let args = Args {
            config: temp_file.path().to_path_buf(),
            ..Default::default()
        };

        let config = load_config(&args).await.unwrap();
        assert_eq!(config.defaults.hostname, "127.0.0.1");
        assert_eq!(config.defaults.max_connections, 42);
    }

    #[tokio::test]
    async fn test_load_config_rejects_bad_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"not [valid toml").unwrap();

        let args = Args {
            config: temp_file.path().to_path_buf(),
            ..Default::default()
        };

        assert!(load_config(&args).await.is_err());
    }
}
