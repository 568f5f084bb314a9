//! RSSI command implementation.

use anyhow::{Context, Result};

use blem_core::Central;

use crate::cli::DeviceArgs;
use crate::config::Config;
use crate::util::{find_device, print_line, release};

pub async fn cmd_rssi(central: &Central, args: &DeviceArgs, config: &Config) -> Result<()> {
    let device = find_device(central, args, config).await?;
    let rssi = device
        .read_rssi()
        .await
        .with_context(|| format!("Failed to read RSSI from {}", device.name()))?;
    release(&device).await;

    print_line(&format!("{} dBm", rssi))
}
