//! # blescout
//!
//! Command line scanner for nearby BLE peripherals and proximity beacons.
//!
//! Scans for a fixed duration (or until Ctrl-C), keeping the latest result
//! per device, then prints the device list as text or JSON.
//!
//! ## Running
//!
//! ```bash
//! # Without hardware
//! cargo run --package blescout-cli -- --backend simulated --duration 5
//!
//! # BlueZ, ranging one beacon family
//! cargo run --package blescout-cli --features bluetooth -- \
//!     --beacon-uuid e2c56db5-dffb-48d2-b060-d0f5a71096e0
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use blescout_cli::app::{self, App, Backend};
use blescout_cli::logging;
use blescout_core::{default_config_path, Config, DeviceListPresenter};
use clap::Parser;
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file. Missing files fall back to defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Event source: `bluez` or `simulated`.
    #[arg(short, long)]
    backend: Option<Backend>,

    /// Seconds to scan. 0 scans until Ctrl-C.
    #[arg(short, long, default_value_t = 10)]
    duration: u64,

    /// Beacon family to range, overriding the configuration.
    #[arg(long)]
    beacon_uuid: Option<Uuid>,

    /// Print the device list as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Interval between simulated scan rounds, in milliseconds.
    #[arg(long, default_value_t = 500)]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    if args.beacon_uuid.is_some() {
        config.scanner.beacon_uuid = args.beacon_uuid;
    }

    logging::init(&config.logging)?;

    info!(config = %config_path.display(), "Starting blescout");

    let backend = args.backend.unwrap_or_else(Backend::platform_default);
    let App {
        coordinator,
        simulation,
    } = app::build(&config.scanner, backend)
        .with_context(|| format!("starting {backend} backend"))?;

    let mut presenter = DeviceListPresenter::new(coordinator.clone(), config.scanner.beacon_uuid);
    presenter.appear().await?;

    if let Some(simulation) = simulation {
        tokio::spawn(simulation.run(Duration::from_millis(args.tick_ms.max(1))));
    }

    wait(args.duration).await;

    presenter.disappear().await?;
    let snapshot = coordinator.snapshot().await?;
    info!(
        devices = presenter.devices().len(),
        nearest_major = snapshot.nearest_major,
        nearest_minor = snapshot.nearest_minor,
        "Scan finished"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&presenter.devices())?);
    } else {
        print!("{}", presenter.render());
    }

    Ok(())
}

/// Sleep for `seconds`, or until Ctrl-C when zero. Ctrl-C always ends early.
async fn wait(seconds: u64) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    if seconds == 0 {
        ctrl_c.await;
        return;
    }

    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        () = ctrl_c => info!("Interrupted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from([
            "blescout",
            "--backend",
            "simulated",
            "--duration",
            "3",
            "--beacon-uuid",
            "e2c56db5-dffb-48d2-b060-d0f5a71096e0",
            "--json",
        ])
        .unwrap();
        assert_eq!(args.backend, Some(Backend::Simulated));
        assert_eq!(args.duration, 3);
        assert!(args.json);
        assert!(args.beacon_uuid.is_some());
        assert_eq!(args.tick_ms, 500);
    }

    #[test]
    fn test_rejects_unknown_backend() {
        assert!(Args::try_parse_from(["blescout", "--backend", "hci0"]).is_err());
    }
}
