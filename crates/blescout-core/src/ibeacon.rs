//! iBeacon advertisement frames.
//!
//! An iBeacon is carried in the manufacturer-specific data of an
//! advertisement under Apple's company identifier:
//!
//! ```text
//! 0x02 0x15 | uuid (16) | major (2, BE) | minor (2, BE) | tx power (1, signed)
//! ```

use uuid::Uuid;

use crate::types::BeaconIds;

/// Bluetooth SIG company identifier assigned to Apple.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

const IBEACON_TYPE: u8 = 0x02;
const IBEACON_LENGTH: u8 = 0x15;
const FRAME_LEN: usize = 2 + IBEACON_LENGTH as usize;

/// A decoded iBeacon frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IBeaconFrame {
    /// Beacon family.
    pub uuid: Uuid,
    /// Major/minor identifiers.
    pub ids: BeaconIds,
    /// Calibrated signal strength at one metre, in dBm.
    pub measured_power: i8,
}

impl IBeaconFrame {
    /// Decode the manufacturer data payload of company [`APPLE_COMPANY_ID`].
    ///
    /// Returns `None` when the payload is not an iBeacon frame.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_LEN || data[0] != IBEACON_TYPE || data[1] != IBEACON_LENGTH {
            return None;
        }
        let uuid = Uuid::from_slice(&data[2..18]).ok()?;
        let major = u16::from_be_bytes([data[18], data[19]]);
        let minor = u16::from_be_bytes([data[20], data[21]]);
        let measured_power = i8::from_be_bytes([data[22]]);
        Some(Self {
            uuid,
            ids: BeaconIds { major, minor },
            measured_power,
        })
    }

    /// Encode the frame as manufacturer data.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(FRAME_LEN);
        data.push(IBEACON_TYPE);
        data.push(IBEACON_LENGTH);
        data.extend_from_slice(self.uuid.as_bytes());
        data.extend_from_slice(&self.ids.major.to_be_bytes());
        data.extend_from_slice(&self.ids.minor.to_be_bytes());
        data.extend_from_slice(&self.measured_power.to_be_bytes());
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAMILY: Uuid = Uuid::from_u128(0xE2C5_6DB5_DFFB_48D2_B060_D0F5_A710_96E0);

    #[test]
    fn test_parse_known_frame() {
        let mut data = vec![0x02, 0x15];
        data.extend_from_slice(FAMILY.as_bytes());
        data.extend_from_slice(&[0x00, 0x01, 0x01, 0x02, 0xC5]);

        let frame = IBeaconFrame::parse(&data).unwrap();
        assert_eq!(frame.uuid, FAMILY);
        assert_eq!(frame.ids, BeaconIds { major: 1, minor: 258 });
        assert_eq!(frame.measured_power, -59);
        assert_eq!(frame.to_bytes(), data);
    }

    #[test]
    fn test_rejects_other_frames() {
        assert!(IBeaconFrame::parse(&[]).is_none());
        assert!(IBeaconFrame::parse(&[0x02, 0x15, 0x00]).is_none());

        let mut data = vec![0x10, 0x05];
        data.extend_from_slice(&[0u8; 21]);
        assert!(IBeaconFrame::parse(&data).is_none());
    }
}
