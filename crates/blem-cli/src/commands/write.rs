//! Write command implementation.

use anyhow::{Context, Result, bail};

use blem_core::Central;
use blem_types::parse_hex;

use crate::cli::DeviceArgs;
use crate::config::Config;
use crate::util::{find_device, parse_characteristic, release};

pub async fn cmd_write(
    central: &Central,
    args: &DeviceArgs,
    characteristic: &str,
    hex: &str,
    no_response: bool,
    quiet: bool,
    config: &Config,
) -> Result<()> {
    let characteristic = parse_characteristic(characteristic)?;
    let payload = parse_hex(hex).context("Invalid payload")?;
    let device = find_device(central, args, config).await?;

    let written = device
        .write(characteristic, payload.clone(), !no_response)
        .await
        .with_context(|| format!("Failed to write {} on {}", characteristic, device.name()))?;
    release(&device).await;

    if !written {
        bail!(
            "{} has no characteristic {}.\n\
             If its service is not advertised, pass it with --service <UUID>.",
            device.name(),
            characteristic
        );
    }
    if !quiet {
        eprintln!("Wrote {} byte(s) to {}.", payload.len(), characteristic);
    }
    Ok(())
}
