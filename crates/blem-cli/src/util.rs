//! Utility functions for CLI operations.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use blem_core::{Central, CentralConfig, ConnectionState, Device, DeviceOptions, DiscoveryBundle};
use blem_types::uuids::parse_uuid;

use crate::cli::DeviceArgs;
use crate::config::{Config, parse_services, resolve_seconds};

/// Install the tracing subscriber.
///
/// `RUST_LOG` wins over the config file; `--verbose` and `--quiet` win over
/// both.
pub fn init_tracing(verbose: bool, quiet: bool, config: &Config) {
    let filter = if quiet {
        EnvFilter::new("warn")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Parse a characteristic or service argument.
pub fn parse_characteristic(s: &str) -> Result<Uuid> {
    parse_uuid(s).with_context(|| format!("Invalid characteristic '{}'", s))
}

/// Whether `device` is the one the user asked for.
///
/// Matches the stable identity, the peripheral id (case-insensitive) or a
/// case-insensitive substring of the name.
pub fn matches_device(query: &str, identity: &Uuid, peripheral_id: &str, name: &str) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return false;
    }
    if Uuid::parse_str(query).is_ok_and(|q| q == *identity) {
        return true;
    }
    if peripheral_id.eq_ignore_ascii_case(query) {
        return true;
    }
    name.to_lowercase().contains(&query.to_lowercase())
}

/// Connect the central to the system Bluetooth adapter.
pub async fn open_central() -> Result<Central> {
    let central = Central::with_btleplug(CentralConfig::default())
        .await
        .context("Failed to open the Bluetooth adapter")?;

    let mut radio = central.radio_states();
    tokio::time::timeout(Duration::from_secs(5), radio.wait_for(|state| state.is_powered_on()))
        .await
        .context("Bluetooth is not powered on")?
        .context("Bluetooth adapter went away")?;
    Ok(central)
}

/// Scan until a device matching `args.device` shows up.
pub async fn find_device(central: &Central, args: &DeviceArgs, config: &Config) -> Result<Device> {
    let seconds = resolve_seconds(args.seconds, config)?;
    // Already known from an earlier scan in this process.
    for device in central.devices().await {
        if matches_device(&args.device, &device.id(), device.peripheral_id().as_str(), &device.name()) {
            return Ok(device);
        }
    }

    let mut extra = config.auto_discover_services()?;
    extra.extend(parse_services("--service", &args.services)?);

    let query = args.device.clone();
    let (found_tx, mut found_rx) = mpsc::unbounded_channel();
    let scanner = central
        .scanner(Duration::from_secs(seconds))
        .services(config.scan_services()?)
        .device_factory(discovery_options(extra))
        .on_discover(move |device| {
            if matches_device(&query, &device.id(), device.peripheral_id().as_str(), &device.name()) {
                let _ = found_tx.send(device.clone());
            }
        })
        .build();

    scanner.start().await.context("Failed to start scanning")?;
    let found = tokio::time::timeout(Duration::from_secs(seconds), found_rx.recv()).await;
    scanner.stop();

    match found {
        Ok(Some(device)) => {
            tracing::info!(device = %device.peripheral_id(), name = %device.name(), "Found device");
            Ok(device)
        }
        _ => bail!(
            "No device matching '{}' found within {}s.\n\
             Run 'blem scan' to list nearby devices.",
            args.device,
            seconds
        ),
    }
}

/// Disconnect and wait briefly for the link to go down.
pub async fn release(device: &Device) {
    if device.disconnect().is_err() {
        return;
    }
    let down = device.wait_for_state(|state| state != ConnectionState::Connected);
    if tokio::time::timeout(Duration::from_secs(2), down).await.is_err() {
        tracing::debug!(device = %device.peripheral_id(), "Disconnect not confirmed");
    }
}

/// Device factory discovering the advertised services plus `extra`.
pub fn discovery_options(
    extra: Vec<Uuid>,
) -> impl Fn(&DiscoveryBundle) -> DeviceOptions + Send + Sync + 'static {
    let extra = Arc::new(extra);
    move |bundle: &DiscoveryBundle| {
        let services: BTreeSet<Uuid> = bundle
            .advertisement
            .services
            .iter()
            .chain(extra.iter())
            .copied()
            .collect();
        DeviceOptions::new().auto_discover_services(services.into_iter().collect())
    }
}

/// Print a value as hex, or as text when asked and valid UTF-8.
pub fn format_value(value: &[u8], as_string: bool) -> String {
    if as_string && let Ok(text) = std::str::from_utf8(value) {
        return text.trim_end_matches('\0').to_string();
    }
    blem_types::to_hex(value)
}

/// Write a line to stdout, flushing so piped consumers see it at once.
pub fn print_line(line: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use blem_core::{AdvertisementData, uuids};

    use super::*;

    #[test]
    fn test_matches_identity() {
        let identity = Uuid::new_v4();
        assert!(matches_device(&identity.to_string(), &identity, "AA:BB", "Thermo"));
        assert!(!matches_device(&Uuid::new_v4().to_string(), &identity, "AA:BB", "Thermo"));
    }

    #[test]
    fn test_matches_peripheral_id_case_insensitive() {
        let identity = Uuid::new_v4();
        assert!(matches_device("aa:bb:cc:dd:ee:ff", &identity, "AA:BB:CC:DD:EE:FF", "Thermo"));
    }

    #[test]
    fn test_matches_name_substring() {
        let identity = Uuid::new_v4();
        assert!(matches_device("thermo", &identity, "AA:BB", "Kitchen Thermometer"));
        assert!(!matches_device("radon", &identity, "AA:BB", "Kitchen Thermometer"));
    }

    #[test]
    fn test_blank_query_matches_nothing() {
        assert!(!matches_device("  ", &Uuid::new_v4(), "AA:BB", "Thermo"));
    }

    #[test]
    fn test_parse_characteristic() {
        assert_eq!(parse_characteristic("2a19").unwrap(), uuids::BATTERY_LEVEL);
        let err = parse_characteristic("zz").unwrap_err();
        assert!(err.to_string().contains("zz"));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&[0x01, 0xff], false), "01ff");
        assert_eq!(format_value(b"Sensor\0", true), "Sensor");
        assert_eq!(format_value(&[0xff, 0xfe], true), "fffe");
    }

    #[test]
    fn test_discovery_options_merge_services() {
        let factory = discovery_options(vec![uuids::BATTERY_SERVICE, uuids::HEART_RATE_SERVICE]);
        let bundle = DiscoveryBundle {
            peripheral_id: "p1".into(),
            advertisement: AdvertisementData {
                services: vec![uuids::HEART_RATE_SERVICE],
                ..Default::default()
            },
            rssi: None,
        };

        let options = factory(&bundle);
        assert_eq!(options.auto_discover_services.len(), 2);
        assert!(options.auto_discover_services.contains(&uuids::BATTERY_SERVICE));
        assert!(options.auto_discover_services.contains(&uuids::HEART_RATE_SERVICE));
    }
}
