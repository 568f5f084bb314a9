//! Bluetooth UUIDs and short-form UUID helpers.
//!
//! Assigned numbers from the Bluetooth SIG are 16-bit (or 32-bit) values
//! embedded in the Bluetooth Base UUID
//! `00000000-0000-1000-8000-00805f9b34fb`. Tools usually print them in the
//! short form (`180f`), so this module accepts both.

use uuid::{Uuid, uuid};

use crate::error::{ParseError, ParseResult};

/// The Bluetooth Base UUID that short UUIDs are expanded into.
pub const BASE_UUID: Uuid = uuid!("00000000-0000-1000-8000-00805f9b34fb");

// --- Standard BLE Service UUIDs ---

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");

/// Generic Attribute Profile (GATT) service.
pub const GATT_SERVICE: Uuid = uuid!("00001801-0000-1000-8000-00805f9b34fb");

/// Device Information service.
pub const DEVICE_INFO_SERVICE: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");

/// Battery service.
pub const BATTERY_SERVICE: Uuid = uuid!("0000180f-0000-1000-8000-00805f9b34fb");

/// Heart Rate service.
pub const HEART_RATE_SERVICE: Uuid = uuid!("0000180d-0000-1000-8000-00805f9b34fb");

// --- Standard Characteristic UUIDs ---

/// Device name characteristic.
pub const DEVICE_NAME: Uuid = uuid!("00002a00-0000-1000-8000-00805f9b34fb");

/// Appearance characteristic.
pub const APPEARANCE: Uuid = uuid!("00002a01-0000-1000-8000-00805f9b34fb");

/// Battery level characteristic.
pub const BATTERY_LEVEL: Uuid = uuid!("00002a19-0000-1000-8000-00805f9b34fb");

/// Heart rate measurement characteristic.
pub const HEART_RATE_MEASUREMENT: Uuid = uuid!("00002a37-0000-1000-8000-00805f9b34fb");

/// Model number string characteristic.
pub const MODEL_NUMBER: Uuid = uuid!("00002a24-0000-1000-8000-00805f9b34fb");

/// Serial number string characteristic.
pub const SERIAL_NUMBER: Uuid = uuid!("00002a25-0000-1000-8000-00805f9b34fb");

/// Firmware revision string characteristic.
pub const FIRMWARE_REVISION: Uuid = uuid!("00002a26-0000-1000-8000-00805f9b34fb");

/// Hardware revision string characteristic.
pub const HARDWARE_REVISION: Uuid = uuid!("00002a27-0000-1000-8000-00805f9b34fb");

/// Software revision string characteristic.
pub const SOFTWARE_REVISION: Uuid = uuid!("00002a28-0000-1000-8000-00805f9b34fb");

/// Manufacturer name string characteristic.
pub const MANUFACTURER_NAME: Uuid = uuid!("00002a29-0000-1000-8000-00805f9b34fb");

/// Expand a 16-bit or 32-bit assigned number into a full UUID.
pub fn from_short(short: u32) -> Uuid {
    let (_, d2, d3, d4) = BASE_UUID.as_fields();
    Uuid::from_fields(short, d2, d3, d4)
}

/// Return the assigned number if `uuid` is built on the Bluetooth Base UUID.
pub fn to_short(uuid: &Uuid) -> Option<u32> {
    let (d1, d2, d3, d4) = uuid.as_fields();
    let (_, b2, b3, b4) = BASE_UUID.as_fields();
    (d2 == b2 && d3 == b3 && d4 == b4).then_some(d1)
}

/// Parse a UUID given in short (`180f`, `0x2A19`, `0000fe95`) or full form.
pub fn parse_uuid(s: &str) -> ParseResult<Uuid> {
    let trimmed = s.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if matches!(hex.len(), 4 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return u32::from_str_radix(hex, 16)
            .map(from_short)
            .map_err(|_| ParseError::InvalidUuid(s.to_string()));
    }

    Uuid::parse_str(trimmed).map_err(|_| ParseError::InvalidUuid(s.to_string()))
}

/// Format a UUID the way BLE tools print it: short form when possible.
pub fn display_uuid(uuid: &Uuid) -> String {
    match to_short(uuid) {
        Some(short) if short <= 0xFFFF => format!("{:04x}", short),
        Some(short) => format!("{:08x}", short),
        None => uuid.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_uuid() {
        assert_eq!(parse_uuid("180f").unwrap(), BATTERY_SERVICE);
        assert_eq!(parse_uuid("0x2A19").unwrap(), BATTERY_LEVEL);
        assert_eq!(parse_uuid("00002a00").unwrap(), DEVICE_NAME);
    }

    #[test]
    fn test_parse_full_uuid() {
        let parsed = parse_uuid("f0cd1503-95da-4f4b-9ac8-aa55d312af0c").unwrap();
        assert_eq!(parsed.to_string(), "f0cd1503-95da-4f4b-9ac8-aa55d312af0c");
        assert!(to_short(&parsed).is_none());
    }

    #[test]
    fn test_parse_invalid_uuid() {
        assert!(matches!(parse_uuid("xyz"), Err(ParseError::InvalidUuid(_))));
        assert!(parse_uuid("18f").is_err());
        assert!(parse_uuid("").is_err());
    }

    #[test]
    fn test_short_round_trip() {
        assert_eq!(to_short(&from_short(0x180a)), Some(0x180a));
        assert_eq!(display_uuid(&DEVICE_INFO_SERVICE), "180a");
        assert_eq!(display_uuid(&from_short(0x0001_fe95)), "0001fe95");
    }

    #[test]
    fn test_standard_uuids_are_short() {
        for uuid in [GAP_SERVICE, BATTERY_SERVICE, BATTERY_LEVEL, MANUFACTURER_NAME] {
            assert!(to_short(&uuid).is_some());
        }
    }
}
