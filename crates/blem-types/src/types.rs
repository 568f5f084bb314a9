//! Value types shared by the blem core and its front ends.

use core::fmt;
use std::collections::HashMap;
use std::ops::BitOr;

use bytes::Bytes;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ParseError, ParseResult};

/// Identifier the transport uses for a peripheral.
///
/// Depending on the platform this is a UUID (CoreBluetooth, WinRT), a MAC
/// address, or a BlueZ object path. blem derives a stable [`Uuid`] identity
/// from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Wrap a transport identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw transport identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeripheralId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// GATT characteristic property flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct CharProperties(u8);

impl CharProperties {
    pub const BROADCAST: Self = Self(0x01);
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);
    pub const AUTHENTICATED_SIGNED_WRITES: Self = Self(0x40);
    pub const EXTENDED_PROPERTIES: Self = Self(0x80);

    /// No properties set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build from the raw attribute bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when every flag in `other` is also set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when the characteristic can push values (notify or indicate).
    #[must_use]
    pub const fn can_subscribe(self) -> bool {
        self.0 & (Self::NOTIFY.0 | Self::INDICATE.0) != 0
    }
}

impl BitOr for CharProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for CharProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(CharProperties, &str); 8] = [
            (CharProperties::BROADCAST, "broadcast"),
            (CharProperties::READ, "read"),
            (CharProperties::WRITE_WITHOUT_RESPONSE, "write-without-response"),
            (CharProperties::WRITE, "write"),
            (CharProperties::NOTIFY, "notify"),
            (CharProperties::INDICATE, "indicate"),
            (CharProperties::AUTHENTICATED_SIGNED_WRITES, "signed-write"),
            (CharProperties::EXTENDED_PROPERTIES, "extended"),
        ];

        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

/// A discovered GATT characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Characteristic {
    pub uuid: Uuid,
    /// The service this characteristic was discovered under.
    pub service_uuid: Uuid,
    pub properties: CharProperties,
}

impl Characteristic {
    pub fn new(uuid: Uuid, service_uuid: Uuid, properties: CharProperties) -> Self {
        Self {
            uuid,
            service_uuid,
            properties,
        }
    }
}

/// Connection state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    FailedToConnect,
    RadioUnavailable,
}

impl ConnectionState {
    /// States from which an enqueue or `connect()` requests a new connection.
    #[must_use]
    pub fn needs_connect(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected
                | ConnectionState::FailedToConnect
                | ConnectionState::RadioUnavailable
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::FailedToConnect => write!(f, "failed to connect"),
            ConnectionState::RadioUnavailable => write!(f, "radio unavailable"),
        }
    }
}

/// Why queued operations were aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AbortReason {
    Disconnected,
    FailedToConnect,
    RadioUnavailable,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Disconnected => write!(f, "device disconnected"),
            AbortReason::FailedToConnect => write!(f, "failed to connect"),
            AbortReason::RadioUnavailable => write!(f, "radio unavailable"),
        }
    }
}

/// Lifecycle of a scan session.
///
/// `Stopped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScanState {
    #[default]
    Waiting,
    Scanning,
    Stopped,
    Failed,
}

impl ScanState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanState::Stopped | ScanState::Failed)
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Waiting => write!(f, "waiting"),
            ScanState::Scanning => write!(f, "scanning"),
            ScanState::Stopped => write!(f, "stopped"),
            ScanState::Failed => write!(f, "failed"),
        }
    }
}

/// Power state of the local Bluetooth radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RadioState {
    /// The radio has not reported a state yet.
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl RadioState {
    #[must_use]
    pub fn is_powered_on(self) -> bool {
        self == RadioState::PoweredOn
    }
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioState::Unknown => write!(f, "unknown"),
            RadioState::Resetting => write!(f, "resetting"),
            RadioState::Unsupported => write!(f, "unsupported"),
            RadioState::Unauthorized => write!(f, "unauthorized"),
            RadioState::PoweredOff => write!(f, "powered off"),
            RadioState::PoweredOn => write!(f, "powered on"),
        }
    }
}

/// Advertisement payload received with a discovery.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdvertisementData {
    pub local_name: Option<String>,
    /// Manufacturer specific data keyed by company identifier.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
    pub services: Vec<Uuid>,
    pub tx_power_level: Option<i16>,
}

impl AdvertisementData {
    /// Whether the advertisement lists `service`.
    #[must_use]
    pub fn advertises(&self, service: &Uuid) -> bool {
        self.services.contains(service) || self.service_data.contains_key(service)
    }
}

/// Parse a hex payload such as `"01ff"`, `"0x01FF"` or `"01:ff"`.
pub fn parse_hex(s: &str) -> ParseResult<Bytes> {
    let trimmed = s.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: String = body
        .chars()
        .filter(|c| !matches!(c, ':' | ' ' | '-'))
        .collect();

    if digits.len() % 2 != 0 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidHex(s.to_string()));
    }

    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            // Pairs are ASCII hex digits, checked above.
            let text = core::str::from_utf8(pair).map_err(|_| ParseError::InvalidHex(s.to_string()))?;
            u8::from_str_radix(text, 16).map_err(|_| ParseError::InvalidHex(s.to_string()))
        })
        .collect::<ParseResult<Vec<u8>>>()
        .map(Bytes::from)
}

/// Lowercase hex without separators.
#[must_use]
pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_properties_flags() {
        let props = CharProperties::READ | CharProperties::NOTIFY;
        assert!(props.contains(CharProperties::READ));
        assert!(!props.contains(CharProperties::WRITE));
        assert!(props.can_subscribe());
        assert!(!CharProperties::WRITE.can_subscribe());
        assert_eq!(props.to_string(), "read|notify");
        assert_eq!(CharProperties::empty().to_string(), "");
    }

    #[test]
    fn test_connection_state_needs_connect() {
        assert!(ConnectionState::Disconnected.needs_connect());
        assert!(ConnectionState::FailedToConnect.needs_connect());
        assert!(ConnectionState::RadioUnavailable.needs_connect());
        assert!(!ConnectionState::Connecting.needs_connect());
        assert!(!ConnectionState::Connected.needs_connect());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_scan_state_terminal() {
        assert!(!ScanState::Waiting.is_terminal());
        assert!(!ScanState::Scanning.is_terminal());
        assert!(ScanState::Stopped.is_terminal());
        assert!(ScanState::Failed.is_terminal());
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("01ff").unwrap().as_ref(), &[0x01, 0xff]);
        assert_eq!(parse_hex("0x01FF").unwrap().as_ref(), &[0x01, 0xff]);
        assert_eq!(parse_hex("de:ad:be:ef").unwrap().as_ref(), &[0xde, 0xad, 0xbe, 0xef]);
        assert!(parse_hex("").unwrap().is_empty());
        assert!(matches!(parse_hex("abc"), Err(ParseError::InvalidHex(_))));
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x00, 0x1a, 0xff]), "001aff");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn test_advertises() {
        let mut adv = AdvertisementData {
            services: vec![crate::uuid::BATTERY_SERVICE],
            ..Default::default()
        };
        assert!(adv.advertises(&crate::uuid::BATTERY_SERVICE));
        assert!(!adv.advertises(&crate::uuid::HEART_RATE_SERVICE));
        adv.service_data
            .insert(crate::uuid::HEART_RATE_SERVICE, vec![1]);
        assert!(adv.advertises(&crate::uuid::HEART_RATE_SERVICE));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_transparent_ids() {
        let id = PeripheralId::new("AA:BB:CC:DD:EE:FF");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"AA:BB:CC:DD:EE:FF\"");
        let state: ConnectionState = serde_json::from_str("\"Connected\"").unwrap();
        assert_eq!(state, ConnectionState::Connected);
    }
}
