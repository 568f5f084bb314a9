//! Scan command implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::sync::mpsc;

use blem_core::{Central, Device};
use blem_types::uuids::display_uuid;

use crate::cli::OutputFormat;
use crate::config::{Config, parse_services, resolve_seconds};
use crate::util::{discovery_options, print_line};

/// One discovered peripheral, as printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRow {
    pub id: String,
    pub peripheral_id: String,
    pub name: String,
    pub rssi: Option<i16>,
    pub services: Vec<String>,
}

impl ScanRow {
    pub fn from_device(device: &Device) -> Self {
        Self {
            id: device.id().to_string(),
            peripheral_id: device.peripheral_id().to_string(),
            name: device.name(),
            rssi: device.rssi(),
            services: device
                .advertisement()
                .services
                .iter()
                .map(display_uuid)
                .collect(),
        }
    }

    fn text(&self) -> String {
        let rssi = self
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "-".to_string());
        let mut line = format!("{:<20} {:<38} {:>8}", self.name, self.peripheral_id, rssi);
        if !self.services.is_empty() {
            line.push_str("  ");
            line.push_str(&self.services.join(","));
        }
        line
    }
}

enum ScanEnd {
    Finished,
    Failed(String),
}

pub async fn cmd_scan(
    central: &Central,
    seconds: Option<u64>,
    services: &[String],
    format: OutputFormat,
    quiet: bool,
    config: &Config,
) -> Result<()> {
    let seconds = resolve_seconds(seconds, config)?;
    let mut filter = config.scan_services()?;
    filter.extend(parse_services("--service", services)?);

    if !quiet && format == OutputFormat::Text {
        eprintln!("Scanning for {}s...", seconds);
    }

    let (found_tx, mut found_rx) = mpsc::unbounded_channel();
    let (end_tx, mut end_rx) = mpsc::unbounded_channel();
    let failed_tx = end_tx.clone();
    let scanner = central
        .scanner(Duration::from_secs(seconds))
        .services(filter)
        .device_factory(discovery_options(config.auto_discover_services()?))
        .on_discover(move |device| {
            let _ = found_tx.send(device.clone());
        })
        .on_finished(move || {
            let _ = end_tx.send(ScanEnd::Finished);
        })
        .on_failed(move |e| {
            let _ = failed_tx.send(ScanEnd::Failed(e.to_string()));
        })
        .build();

    scanner.start().await.context("Failed to start scanning")?;

    let end = tokio::select! {
        end = end_rx.recv() => end,
        _ = tokio::signal::ctrl_c() => {
            scanner.stop();
            Some(ScanEnd::Finished)
        }
    };
    if let Some(ScanEnd::Failed(error)) = end {
        bail!("Scan failed: {}", error);
    }

    // Latest sighting per peripheral.
    let mut seen = BTreeMap::new();
    while let Ok(device) = found_rx.try_recv() {
        seen.insert(device.peripheral_id().clone(), device);
    }
    let rows: Vec<ScanRow> = seen.values().map(ScanRow::from_device).collect();

    match format {
        OutputFormat::Json => {
            print_line(&serde_json::to_string_pretty(&rows).context("Failed to serialize scan")?)?;
        }
        OutputFormat::Text => {
            for row in &rows {
                print_line(&row.text())?;
            }
            if !quiet {
                eprintln!("Found {} device(s).", rows.len());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ScanRow {
        ScanRow {
            id: "5b0e1c3e-7a4e-4f5c-9a44-0e3f5c2d1b7a".to_string(),
            peripheral_id: "AA:BB:CC:DD:EE:FF".to_string(),
            name: "Thermo".to_string(),
            rssi: Some(-61),
            services: vec!["180f".to_string()],
        }
    }

    #[test]
    fn test_text_row() {
        let line = row().text();
        assert!(line.starts_with("Thermo"));
        assert!(line.contains("AA:BB:CC:DD:EE:FF"));
        assert!(line.contains("-61 dBm"));
        assert!(line.ends_with("180f"));
    }

    #[test]
    fn test_text_row_without_rssi() {
        let row = ScanRow {
            rssi: None,
            services: Vec::new(),
            ..row()
        };
        assert!(row.text().trim_end().ends_with('-'));
    }

    #[test]
    fn test_json_row() {
        let json = serde_json::to_value(row()).unwrap();
        assert_eq!(json["peripheral_id"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(json["rssi"], -61);
        assert_eq!(json["services"][0], "180f");
    }
}
