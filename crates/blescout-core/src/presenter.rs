//! Device list presentation.
//!
//! [`DeviceList`] keeps the most recent [`ScanResult`] per identity.
//! [`DeviceListPresenter`] ties a list to a coordinator session: it starts
//! scanning when it appears and stops when it disappears.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;
use uuid::Uuid;

use crate::coordinator::ScanCoordinator;
use crate::error::Result;
use crate::types::{DeviceId, ScanResult};

/// Identity under which a result is listed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListKey {
    /// A peripheral, keyed by its platform identifier.
    Peripheral(DeviceId),
    /// A beacon-only result, keyed by family and identifiers.
    Beacon {
        /// Beacon family.
        uuid: Option<Uuid>,
        /// Beacon major.
        major: i32,
        /// Beacon minor.
        minor: i32,
    },
}

impl ListKey {
    /// Identity of `result`.
    #[must_use]
    pub fn of(result: &ScanResult) -> Self {
        match &result.device {
            Some(device) => Self::Peripheral(device.id.clone()),
            None => Self::Beacon {
                uuid: result.beacon_uuid,
                major: result.major,
                minor: result.minor,
            },
        }
    }
}

/// Ordered list holding the latest result per [`ListKey`].
#[derive(Debug, Clone, Default)]
pub struct DeviceList {
    entries: Vec<ScanResult>,
}

impl DeviceList {
    /// Create an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Replace the first entry with the same identity, or append.
    pub fn upsert(&mut self, result: ScanResult) {
        let key = ListKey::of(&result);
        match self
            .entries
            .iter()
            .position(|entry| ListKey::of(entry) == key)
        {
            Some(index) => self.entries[index] = result,
            None => self.entries.push(result),
        }
    }

    /// Entries in first-seen order.
    #[must_use]
    pub fn entries(&self) -> &[ScanResult] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Render the list as text, one block per entry.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            render_entry(&mut out, entry);
            out.push('\n');
        }
        out
    }
}

fn render_entry(out: &mut String, entry: &ScanResult) {
    let name = entry
        .device
        .as_ref()
        .and_then(|device| device.name.as_deref())
        .unwrap_or("Unknown");
    let id = entry
        .device
        .as_ref()
        .map_or("N/A", |device| device.id.as_str());

    // Writing to a String cannot fail.
    let _ = writeln!(out, "Device Name: {name}");
    let _ = writeln!(out, "  RSSI: {}", entry.signal_strength);
    let _ = writeln!(out, "  UUID: {id}");
    if let Some(advertisement) = &entry.advertisement {
        let data = serde_json::to_string(advertisement).unwrap_or_default();
        let _ = writeln!(out, "  Advertisement Data: {data}");
    }
    if entry.beacon_ids().is_some() {
        if entry.is_beacon_only() {
            if let Some(uuid) = entry.beacon_uuid {
                let _ = writeln!(out, "  Beacon UUID: {uuid}");
            }
        }
        let _ = writeln!(out, "  Beacon Major: {}", entry.major);
        let _ = writeln!(out, "  Beacon Minor: {}", entry.minor);
    }
    let _ = writeln!(out, "  Last Seen: {}", entry.observed_at.to_rfc3339());
}

/// A device list bound to a coordinator for as long as it is visible.
pub struct DeviceListPresenter {
    coordinator: ScanCoordinator,
    beacon_uuid: Option<Uuid>,
    devices: Arc<Mutex<DeviceList>>,
    visible: bool,
}

impl DeviceListPresenter {
    /// Create a presenter. `beacon_uuid` is the family to range while
    /// visible, if any.
    #[must_use]
    pub fn new(coordinator: ScanCoordinator, beacon_uuid: Option<Uuid>) -> Self {
        Self {
            coordinator,
            beacon_uuid,
            devices: Arc::default(),
            visible: false,
        }
    }

    /// Configure the beacon target and start scanning into the list.
    ///
    /// # Errors
    ///
    /// Returns an error if the coordinator has shut down.
    pub async fn appear(&mut self) -> Result<()> {
        if self.visible {
            return Ok(());
        }
        self.coordinator
            .configure_beacon_target(self.beacon_uuid)
            .await?;
        let devices = Arc::clone(&self.devices);
        self.coordinator
            .start(move |result| lock(&devices).upsert(result))
            .await?;
        self.visible = true;
        Ok(())
    }

    /// Stop scanning. The list keeps its entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the coordinator has shut down.
    pub async fn disappear(&mut self) -> Result<()> {
        if !self.visible {
            return Ok(());
        }
        self.visible = false;
        self.coordinator.stop().await?;
        info!("BLE scan has been stopped");
        Ok(())
    }

    /// Whether the presenter is currently visible.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    /// Copy of the current entries.
    #[must_use]
    pub fn devices(&self) -> Vec<ScanResult> {
        lock(&self.devices).entries().to_vec()
    }

    /// Render the current list.
    #[must_use]
    pub fn render(&self) -> String {
        lock(&self.devices).render()
    }
}

fn lock(list: &Mutex<DeviceList>) -> MutexGuard<'_, DeviceList> {
    list.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDiscovery, MockProximity};
    use crate::source::{AuthorizationState, BeaconSighting, PowerState};
    use crate::types::{AdvertisementData, BeaconIds, DeviceHandle};

    const FAMILY: Uuid = Uuid::from_u128(0x0000_0000_0000_0000_0000_0000_0000_BEEF);

    fn peripheral(id: &str, signal_strength: i32) -> ScanResult {
        ScanResult::peripheral(
            signal_strength,
            DeviceHandle::new(id),
            AdvertisementData::new(),
            None,
            None,
        )
    }

    #[test]
    fn test_upsert_replaces_same_device() {
        let mut list = DeviceList::new();
        list.upsert(peripheral("AA", -70));
        list.upsert(peripheral("BB", -60));
        list.upsert(peripheral("AA", -40));

        assert_eq!(list.len(), 2);
        assert_eq!(list.entries()[0].signal_strength, -40);
        assert_eq!(list.entries()[1].signal_strength, -60);
    }

    #[test]
    fn test_beacons_keyed_by_identifiers() {
        let mut list = DeviceList::new();
        list.upsert(ScanResult::beacon(-70, FAMILY, BeaconIds { major: 1, minor: 1 }));
        list.upsert(ScanResult::beacon(-60, FAMILY, BeaconIds { major: 1, minor: 2 }));
        list.upsert(ScanResult::beacon(-50, FAMILY, BeaconIds { major: 1, minor: 1 }));

        assert_eq!(list.len(), 2);
        assert_eq!(list.entries()[0].signal_strength, -50);
    }

    #[test]
    fn test_render_shows_beacon_ids_only_when_known() {
        let mut list = DeviceList::new();
        list.upsert(peripheral("AA:BB", -70));
        let text = list.render();
        assert!(text.contains("Device Name: Unknown"));
        assert!(text.contains("UUID: AA:BB"));
        assert!(text.contains("Advertisement Data: {}"));
        assert!(!text.contains("Beacon Major"));

        list.clear();
        list.upsert(ScanResult::beacon(-55, FAMILY, BeaconIds { major: 7, minor: 9 }));
        let text = list.render();
        assert!(text.contains("UUID: N/A"));
        assert!(text.contains("Beacon Major: 7"));
        assert!(text.contains("Beacon Minor: 9"));
    }

    #[tokio::test]
    async fn test_presenter_lifecycle() {
        let (discovery, discovery_handle) = MockDiscovery::new(PowerState::PoweredOn);
        let (proximity, proximity_handle) = MockProximity::new(AuthorizationState::AuthorizedFull);
        let coordinator = ScanCoordinator::builder(discovery, proximity).spawn();
        let mut presenter = DeviceListPresenter::new(coordinator.clone(), Some(FAMILY));

        presenter.appear().await.unwrap();
        assert!(presenter.is_visible());
        assert!(proximity_handle.ranging().contains(&FAMILY));

        let device = DeviceHandle::new("AA:BB:CC:DD:EE:FF").with_name("Tag");
        discovery_handle.advertise(device.clone(), -80, AdvertisementData::new());
        discovery_handle.advertise(device, -45, AdvertisementData::new());
        proximity_handle.range(
            FAMILY,
            vec![BeaconSighting {
                uuid: FAMILY,
                ids: BeaconIds { major: 4, minor: 2 },
                signal_strength: -60,
            }],
        );
        coordinator.snapshot().await.unwrap();

        let devices = presenter.devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].signal_strength, -45);
        assert!(devices[1].is_beacon_only());
        assert!(presenter.render().contains("Device Name: Tag"));

        presenter.disappear().await.unwrap();
        assert!(!presenter.is_visible());
        assert!(!discovery_handle.is_scanning());
        assert!(proximity_handle.ranging().is_empty());
        assert!(!coordinator.snapshot().await.unwrap().is_scanning);
    }
}
