//! Synthetic scan traffic for running without Bluetooth hardware.
//!
//! A [`Simulation`] drives the in-memory sources behind a coordinator: it
//! grants ranging authorization once, as a user answering the prompt would,
//! then on every tick advertises a fixed set of peripherals and ranges two
//! beacons of the configured family. Signal strengths drift
//! deterministically from tick to tick.

use std::time::Duration;

use blescout_core::{
    AdvertisementData, AuthorizationState, BeaconIds, BeaconSighting, DeviceHandle,
    MockDiscoveryHandle, MockProximityHandle,
};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

struct Peripheral {
    id: &'static str,
    name: Option<&'static str>,
    base_rssi: i32,
    manufacturer_data: &'static str,
}

const PERIPHERALS: [Peripheral; 3] = [
    Peripheral {
        id: "C4:7C:8D:6A:1F:02",
        name: Some("Flower care"),
        base_rssi: -58,
        manufacturer_data: "",
    },
    Peripheral {
        id: "E8:2A:44:91:0B:7D",
        name: Some("Heart Rate"),
        base_rssi: -67,
        manufacturer_data: "6b0001",
    },
    Peripheral {
        id: "F0:99:19:3C:D2:40",
        name: None,
        base_rssi: -81,
        manufacturer_data: "4c0010051d1c",
    },
];

const BEACONS: [(BeaconIds, i32); 2] = [
    (BeaconIds { major: 1, minor: 7 }, -62),
    (BeaconIds { major: 1, minor: 12 }, -71),
];

/// Scripted traffic over a pair of mock source handles.
#[derive(Debug)]
pub struct Simulation {
    discovery: MockDiscoveryHandle,
    proximity: MockProximityHandle,
    beacon_uuid: Option<Uuid>,
    tick: u64,
    authorized: bool,
}

impl Simulation {
    /// Create a simulation ranging `beacon_uuid`, if any.
    #[must_use]
    pub const fn new(
        discovery: MockDiscoveryHandle,
        proximity: MockProximityHandle,
        beacon_uuid: Option<Uuid>,
    ) -> Self {
        Self {
            discovery,
            proximity,
            beacon_uuid,
            tick: 0,
            authorized: false,
        }
    }

    /// Emit one round of traffic. Returns `false` once nothing is listening.
    pub fn step(&mut self) -> bool {
        if !self.authorized {
            self.authorized = true;
            info!("Simulated user granted ranging authorization");
            if !self
                .proximity
                .set_authorization(AuthorizationState::AuthorizedLimited)
            {
                return false;
            }
        }

        for (index, peripheral) in PERIPHERALS.iter().enumerate() {
            let mut device = DeviceHandle::new(peripheral.id);
            if let Some(name) = peripheral.name {
                device = device.with_name(name);
            }
            let rssi = peripheral.base_rssi - drift(self.tick, index);
            if !self
                .discovery
                .advertise(device, rssi, advertisement(peripheral))
            {
                return false;
            }
        }

        if let Some(uuid) = self.beacon_uuid {
            let beacons = BEACONS
                .iter()
                .enumerate()
                .map(|(index, (ids, base_rssi))| BeaconSighting {
                    uuid,
                    ids: *ids,
                    signal_strength: base_rssi - drift(self.tick, index + PERIPHERALS.len()),
                })
                .collect();
            if !self.proximity.range(uuid, beacons) {
                return false;
            }
        }

        debug!(tick = self.tick, "Simulated scan round");
        self.tick += 1;
        true
    }

    /// Emit a round every `period` until nothing is listening.
    pub async fn run(mut self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if !self.step() {
                debug!("Simulation stopped: coordinator has shut down");
                return;
            }
        }
    }
}

/// Deterministic 0..=14 dB attenuation for source `index` at `tick`.
fn drift(tick: u64, index: usize) -> i32 {
    let step = tick.wrapping_mul(7).wrapping_add(index as u64 * 13) % 15;
    i32::try_from(step).unwrap_or_default()
}

fn advertisement(peripheral: &Peripheral) -> AdvertisementData {
    let mut data = AdvertisementData::new();
    if let Some(name) = peripheral.name {
        data.insert("local_name".into(), json!(name));
    }
    if !peripheral.manufacturer_data.is_empty() {
        data.insert("manufacturer_data".into(), json!(peripheral.manufacturer_data));
    }
    data.insert("tx_power_level".into(), json!(-59));
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use blescout_core::{MockDiscovery, MockProximity, PowerState, ScanCoordinator};
    use std::sync::{Arc, Mutex};

    const FAMILY: Uuid = Uuid::from_u128(0xE2C5_6DB5_DFFB_48D2_B060_D0F5_A710_96E0);

    #[test]
    fn test_drift_is_bounded() {
        for tick in 0..100 {
            for index in 0..5 {
                assert!((0..15).contains(&drift(tick, index)));
            }
        }
    }

    #[test]
    fn test_step_without_coordinator_reports_closed() {
        let (_, discovery) = MockDiscovery::new(PowerState::PoweredOn);
        let (_, proximity) = MockProximity::new(AuthorizationState::NotDetermined);
        let mut simulation = Simulation::new(discovery, proximity, Some(FAMILY));
        assert!(!simulation.step());
    }

    #[tokio::test]
    async fn test_simulation_feeds_coordinator() {
        let (discovery, discovery_handle) = MockDiscovery::new(PowerState::PoweredOn);
        let (proximity, proximity_handle) = MockProximity::new(AuthorizationState::NotDetermined);
        let coordinator = ScanCoordinator::builder(discovery, proximity).spawn();
        coordinator.configure_beacon_target(Some(FAMILY)).await.unwrap();

        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        coordinator
            .start(move |result| sink.lock().unwrap().push(result))
            .await
            .unwrap();
        assert!(!discovery_handle.is_scanning());

        let mut simulation =
            Simulation::new(discovery_handle.clone(), proximity_handle.clone(), Some(FAMILY));
        assert!(simulation.step());
        assert!(simulation.step());

        let snapshot = coordinator.snapshot().await.unwrap();
        assert!(snapshot.is_scanning);
        assert!(discovery_handle.is_scanning());
        assert!(proximity_handle.ranging().contains(&FAMILY));
        assert_eq!(snapshot.nearest_major, 1);

        let results = results.lock().unwrap();
        assert!(results.iter().any(|result| result.is_beacon_only()));
        assert!(results
            .iter()
            .any(|result| result.device.as_ref().is_some_and(|d| d.name.is_none())));
    }
}
