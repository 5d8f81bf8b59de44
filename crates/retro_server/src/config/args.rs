//! Command-line argument parsing for the emulator binary.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the legacy game-service emulator.
///
/// Arguments override configuration file settings where both exist.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    ///
    /// Path to the TOML configuration file. If the file doesn't exist, a
    /// default configuration is created there.
    #[arg(short, long, default_value = "retrospy.toml")]
    pub config: PathBuf,

    /// Only start the named services (repeatable). Defaults to every
    /// service the factory knows about.
    #[arg(short, long)]
    pub service: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: PathBuf::from("retrospy.toml"),
            service: Vec::new(),
            debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default() {
        let args = Args::default();
        assert_eq!(args.config, PathBuf::from("retrospy.toml"));
        assert!(args.service.is_empty());
        assert!(!args.debug);
    }
}
