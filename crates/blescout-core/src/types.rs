//! Shared result types.
//!
//! [`ScanResult`] is the single record type handed to subscribers. Peripheral
//! observations carry a [`DeviceHandle`] and advertisement payload; beacon
//! observations carry only the beacon family and its major/minor identifiers.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel for a beacon major/minor that is not applicable or not yet known.
pub const UNKNOWN_BEACON_ID: i32 = -1;

/// Advertisement payload: string keys mapped to arbitrary values.
pub type AdvertisementData = BTreeMap<String, serde_json::Value>;

/// Opaque platform identifier of a peripheral.
///
/// On BlueZ this is the device address; other backends may use any stable
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a platform identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Reference to a discovered peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Platform identifier.
    pub id: DeviceId,

    /// Advertised local name, if any.
    pub name: Option<String>,
}

impl DeviceHandle {
    /// Create a handle without a name.
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    /// Attach an advertised name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Major/minor pair of a single beacon within its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeaconIds {
    /// Beacon major value.
    pub major: u16,
    /// Beacon minor value.
    pub minor: u16,
}

/// One observed peripheral or beacon event.
///
/// Built once by the coordinator and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Signal strength in dBm. More negative means weaker.
    pub signal_strength: i32,

    /// The peripheral, for discovery events.
    pub device: Option<DeviceHandle>,

    /// Advertisement payload, for discovery events.
    pub advertisement: Option<AdvertisementData>,

    /// Beacon family UUID.
    pub beacon_uuid: Option<Uuid>,

    /// Beacon major, or [`UNKNOWN_BEACON_ID`].
    pub major: i32,

    /// Beacon minor, or [`UNKNOWN_BEACON_ID`].
    pub minor: i32,

    /// Error description. Empty when there is none.
    pub error: String,

    /// When the coordinator built this result.
    pub observed_at: DateTime<Utc>,
}

impl ScanResult {
    /// Result for an advertising peripheral.
    ///
    /// `nearest` carries the identifiers of the closest ranged beacon, if one
    /// is known; otherwise major and minor are [`UNKNOWN_BEACON_ID`].
    #[must_use]
    pub fn peripheral(
        signal_strength: i32,
        device: DeviceHandle,
        advertisement: AdvertisementData,
        beacon_uuid: Option<Uuid>,
        nearest: Option<BeaconIds>,
    ) -> Self {
        let (major, minor) = nearest.map_or((UNKNOWN_BEACON_ID, UNKNOWN_BEACON_ID), |ids| {
            (i32::from(ids.major), i32::from(ids.minor))
        });
        Self {
            signal_strength,
            device: Some(device),
            advertisement: Some(advertisement),
            beacon_uuid,
            major,
            minor,
            error: String::new(),
            observed_at: Utc::now(),
        }
    }

    /// Result for a ranged beacon.
    #[must_use]
    pub fn beacon(signal_strength: i32, beacon_uuid: Uuid, ids: BeaconIds) -> Self {
        Self {
            signal_strength,
            device: None,
            advertisement: None,
            beacon_uuid: Some(beacon_uuid),
            major: i32::from(ids.major),
            minor: i32::from(ids.minor),
            error: String::new(),
            observed_at: Utc::now(),
        }
    }

    /// Beacon identifiers, when both major and minor are known.
    #[must_use]
    pub fn beacon_ids(&self) -> Option<BeaconIds> {
        let major = u16::try_from(self.major).ok()?;
        let minor = u16::try_from(self.minor).ok()?;
        Some(BeaconIds { major, minor })
    }

    /// Whether this result came from beacon ranging rather than discovery.
    #[must_use]
    pub const fn is_beacon_only(&self) -> bool {
        self.device.is_none()
    }
}
