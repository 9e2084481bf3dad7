//! # drilldown-modhost
//!
//! The DrillDown mod host.
//!
//! The host is responsible for:
//! - Discovering mod packages in the mods directory
//! - Validating and loading them, each in its own sandboxed load scope
//! - Publishing host events to mods over the event bus
//! - Unloading every mod in reverse order on shutdown
//!
//! ## Configuration
//!
//! The host reads configuration from `$XDG_CONFIG_HOME/drilldown/modhost.toml`.
//! A commented default file is written on first start.
//!
//! ## Running
//!
//! ```bash
//! # Start the host
//! cargo run --bin drilldown-modhost
//!
//! # With debug logging
//! RUST_LOG=debug cargo run --bin drilldown-modhost
//! ```

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use drilldown_mod_api::ModLoader;
use drilldown_mod_runtime::LinkedCodeLoader;
use drilldown_modhost::bundled::{self, GameInitEvent, HostInfo};
use drilldown_modhost::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so it can pick the log level
    let loaded = Config::load_default();
    let log_level = loaded
        .as_ref()
        .map(|loaded| loaded.config.host.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .with_target(true)
        .init();

    info!("Starting drilldown-modhost v{}", env!("CARGO_PKG_VERSION"));

    let config = match loaded {
        Ok(loaded) => {
            if loaded.created {
                info!("Created default configuration file at: {}", loaded.path.display());
            }
            info!("Loaded configuration from {}", loaded.path.display());
            loaded.config
        }
        Err(e) => {
            info!("Failed to load config, using defaults: {:#}", e);
            Config::default()
        }
    };

    let mods_dir = config.mods_dir()?;
    info!("Mods directory: {}", mods_dir.display());

    if config.mods.install_example {
        if let Err(e) = bundled::install_example(&mods_dir) {
            warn!("Could not install the example mod: {:#}", e);
        }
    }

    // Link bundled code units and publish host symbols
    let mut code = LinkedCodeLoader::new();
    bundled::register(&mut code);
    let host = bundled::host_types(HostInfo {
        version: config.host.version.clone(),
        side: config.host.side,
    });

    let loader = ModLoader::new(config.loader_config()?, Arc::new(code), Arc::new(host))?;
    let report = loader.load_all()?;

    info!("Loaded {} mod(s): {:?}", report.loaded.len(), report.loaded);
    for (id, error) in &report.failed {
        warn!("Mod '{}' failed: {}", id, error);
    }
    for (path, error) in &report.rejected {
        warn!("Package {} rejected: {}", path.display(), error);
    }

    let delivery = loader.event_bus().post(&GameInitEvent::new());
    if delivery.failed > 0 {
        warn!(
            "{} of {} init handler(s) failed",
            delivery.failed, delivery.delivered
        );
    }

    info!("Host startup complete");
    info!("Press Ctrl+C to stop");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    loader.unload_all();

    info!("Host stopped");
    Ok(())
}
