//! Platform-agnostic types for the blem BLE operation orchestrator.
//!
//! This crate holds the value types shared by `blem-core` and the `blem`
//! command-line tool: peripheral identifiers, characteristic descriptions,
//! the connection, scan and radio state enums, and the standard GATT UUIDs.
//!
//! # Example
//!
//! ```
//! use blem_types::{uuids, ConnectionState};
//!
//! let battery = uuids::parse_uuid("2a19").unwrap();
//! assert_eq!(battery, uuids::BATTERY_LEVEL);
//! assert!(ConnectionState::Disconnected.needs_connect());
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    AbortReason, AdvertisementData, CharProperties, Characteristic, ConnectionState, PeripheralId,
    RadioState, ScanState, parse_hex, to_hex,
};
pub use uuid as uuids;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_hex_parse_accepts_own_output(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let parsed = parse_hex(&to_hex(&data)).unwrap();
            prop_assert_eq!(parsed.as_ref(), data.as_slice());
        }

        #[test]
        fn test_parse_hex_never_panics(s in "\\PC*") {
            let _ = parse_hex(&s);
        }

        #[test]
        fn test_parse_uuid_never_panics(s in "\\PC*") {
            let _ = uuids::parse_uuid(&s);
        }

        #[test]
        fn test_short_uuid_display_parses_back(short in any::<u16>()) {
            let uuid = uuids::from_short(u32::from(short));
            let shown = uuids::display_uuid(&uuid);
            prop_assert_eq!(uuids::parse_uuid(&shown).unwrap(), uuid);
        }
    }
}
