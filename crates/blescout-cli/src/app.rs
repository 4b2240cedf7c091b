//! Assembly of a running coordinator from configuration.

use std::fmt;
use std::str::FromStr;

use blescout_core::{
    AuthorizationState, CoordinatorBuilder, MockDiscovery, MockProximity, PowerState,
    QueueDispatcher, ScanCoordinator, ScannerConfig,
};
use tracing::{info, warn};

use crate::simulate::Simulation;

/// Where scan events come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// The local BlueZ adapter. Needs the `bluetooth` feature.
    Bluez,
    /// Scripted in-memory traffic.
    Simulated,
}

impl Backend {
    /// `Bluez` when built with Bluetooth support, `Simulated` otherwise.
    #[must_use]
    pub const fn platform_default() -> Self {
        if cfg!(feature = "bluetooth") {
            Self::Bluez
        } else {
            Self::Simulated
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bluez => f.write_str("bluez"),
            Self::Simulated => f.write_str("simulated"),
        }
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bluez" => Ok(Self::Bluez),
            "simulated" | "sim" => Ok(Self::Simulated),
            other => anyhow::bail!("unknown backend '{other}', expected 'bluez' or 'simulated'"),
        }
    }
}

/// A spawned coordinator plus the traffic driver for simulated runs.
pub struct App {
    /// Handle to the coordinator task.
    pub coordinator: ScanCoordinator,
    /// Present for [`Backend::Simulated`].
    pub simulation: Option<Simulation>,
}

/// Spawn a coordinator over `backend`, configured from `scanner`.
///
/// Callbacks are delivered on a dedicated task through a
/// [`QueueDispatcher`], away from the coordinator task. Permission notices
/// are logged.
///
/// # Errors
///
/// Returns an error if `backend` is not available in this build.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn build(scanner: &ScannerConfig, backend: Backend) -> anyhow::Result<App> {
    let (dispatcher, queue) = QueueDispatcher::new();
    tokio::spawn(queue.run());

    let (builder, simulation) = match backend {
        Backend::Simulated => {
            let (discovery, discovery_handle) = MockDiscovery::new(PowerState::PoweredOn);
            let (proximity, proximity_handle) =
                MockProximity::new(AuthorizationState::NotDetermined);
            let simulation =
                Simulation::new(discovery_handle, proximity_handle, scanner.beacon_uuid);
            (
                ScanCoordinator::builder(discovery, proximity),
                Some(simulation),
            )
        }
        Backend::Bluez => (bluez_builder(scanner)?, None),
    };

    info!(%backend, beacon_uuid = ?scanner.beacon_uuid, "Starting scan coordinator");

    let coordinator = builder
        .dispatcher(dispatcher)
        .allow_duplicate_reports(scanner.allow_duplicate_reports)
        .on_notice(|notice| warn!(title = notice.title(), "{}", notice.message()))
        .spawn();

    Ok(App {
        coordinator,
        simulation,
    })
}

#[cfg(feature = "bluetooth")]
fn bluez_builder(scanner: &ScannerConfig) -> anyhow::Result<CoordinatorBuilder> {
    use std::time::Duration;

    use blescout_core::{BluezBeacons, BluezDiscovery};

    let beacons = BluezBeacons::new(
        Duration::from_millis(scanner.ranging_interval_ms),
        Duration::from_millis(scanner.beacon_timeout_ms),
    );
    Ok(ScanCoordinator::builder(BluezDiscovery::new(), beacons))
}

#[cfg(not(feature = "bluetooth"))]
fn bluez_builder(_scanner: &ScannerConfig) -> anyhow::Result<CoordinatorBuilder> {
    anyhow::bail!(
        "this build has no Bluetooth support; rebuild with --features bluetooth \
         or use --backend simulated"
    )
}
