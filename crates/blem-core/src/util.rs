//! Identity helpers shared by the central and the transports.

use uuid::Uuid;

use blem_types::PeripheralId;

/// Display name for devices that never advertised one.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Stable device identity for a transport peripheral id.
///
/// Ids that already are UUIDs (CoreBluetooth) are used as they are. Anything
/// else (MAC addresses, BlueZ object paths) is hashed into a UUIDv5, so a
/// peripheral maps to the same identity on every run.
///
/// ```
/// use blem_core::util::device_identity;
/// use blem_types::PeripheralId;
///
/// let a = device_identity(&PeripheralId::new("AA:BB:CC:DD:EE:FF"));
/// let b = device_identity(&PeripheralId::new("aa:bb:cc:dd:ee:ff"));
/// assert_eq!(a, b);
/// ```
pub fn device_identity(id: &PeripheralId) -> Uuid {
    let raw = id.as_str().trim();
    match Uuid::parse_str(raw) {
        Ok(uuid) => uuid,
        Err(_) => Uuid::new_v5(&Uuid::NAMESPACE_OID, raw.to_ascii_uppercase().as_bytes()),
    }
}

/// Format a btleplug peripheral id as a plain string.
///
/// btleplug only exposes the platform id through `Debug`, which wraps it in
/// `PeripheralId(...)`.
pub fn format_peripheral_id(id: &btleplug::platform::PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Pick the transport id for a peripheral.
///
/// macOS reports a zero address for every peripheral, so its platform id is
/// used instead.
pub fn create_identifier(address: &str, platform_id: &str) -> PeripheralId {
    if address == "00:00:00:00:00:00" {
        PeripheralId::new(platform_id)
    } else {
        PeripheralId::new(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_ids_are_used_verbatim() {
        let raw = "5b0e1c3e-7a4e-4f5c-9a44-0e3f5c2d1b7a";
        let id = device_identity(&PeripheralId::new(raw));
        assert_eq!(id.to_string(), raw);
    }

    #[test]
    fn test_address_ids_are_stable() {
        let first = device_identity(&PeripheralId::new("AA:BB:CC:DD:EE:FF"));
        let second = device_identity(&PeripheralId::new("AA:BB:CC:DD:EE:FF"));
        let other = device_identity(&PeripheralId::new("AA:BB:CC:DD:EE:00"));

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.get_version_num(), 5);
    }

    #[test]
    fn test_object_paths_hash() {
        let id = device_identity(&PeripheralId::new("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF"));
        assert_eq!(id.get_version_num(), 5);
    }

    #[test]
    fn test_create_identifier_with_valid_address() {
        let id = create_identifier("AA:BB:CC:DD:EE:FF", "hci0/dev_AA_BB");
        assert_eq!(id.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_create_identifier_with_zero_address() {
        let id = create_identifier("00:00:00:00:00:00", "5b0e1c3e-7a4e-4f5c-9a44-0e3f5c2d1b7a");
        assert_eq!(id.as_str(), "5b0e1c3e-7a4e-4f5c-9a44-0e3f5c2d1b7a");
    }
}
