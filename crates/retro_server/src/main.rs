//! Entry point for the legacy game-service emulator.
//!
//! Loads configuration, builds the service factory, starts the configured
//! services, and keeps them running until a shutdown signal arrives.

mod config;
mod factory;
mod handlers;
mod logging;
mod shutdown;

use anyhow::Result;
use clap::Parser;
use config::Args;
use factory::ServerFactory;
use std::time::Instant;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = Instant::now();
    let args = Args::parse();

    // Loading runs before the subscriber exists, so load_config stays
    // silent and its outcome is logged below.
    let config_existed = args.config.exists();
    let config = config::load_config(&args).await?;
    logging::setup_logging(&args, config.logging.as_ref())?;

    info!(
        "Legacy game-service emulator v{} starting",
        env!("CARGO_PKG_VERSION")
    );
    if config_existed {
        info!("Configuration loaded from {}", args.config.display());
    } else {
        info!(
            "Created default configuration file: {}",
            args.config.display()
        );
    }

    let factory = ServerFactory::create(&config);

    // An explicit --service list restricts startup to those names;
    // otherwise every known service comes up.
    let requested = if args.service.is_empty() {
        factory.names()
    } else {
        args.service.clone()
    };

    let mut started = 0usize;
    for name in &requested {
        match factory.start_server(name) {
            Ok(addr) => {
                info!("{name} server ready at {addr}");
                started += 1;
            }
            Err(e) => {
                error!("failed to start {name} server: {e}");
            }
        }
    }

    if started == 0 {
        anyhow::bail!("no services could be started");
    }
    if started < requested.len() {
        warn!(
            "{} of {} requested services failed to start",
            requested.len() - started,
            requested.len()
        );
    }

    info!(
        "Startup complete in {:.2}ms, {started} service(s) running",
        startup_start.elapsed().as_secs_f64() * 1000.0
    );

    shutdown::wait_for_signal().await?;

    info!("Shutting down services");
    factory.stop_all();
    factory.dispose();
    info!("Shutdown complete");

    Ok(())
}
