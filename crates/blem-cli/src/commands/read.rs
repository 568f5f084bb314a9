//! Read command implementation.

use anyhow::{Context, Result, bail};

use blem_core::Central;

use crate::cli::DeviceArgs;
use crate::config::Config;
use crate::util::{find_device, format_value, parse_characteristic, print_line, release};

pub async fn cmd_read(
    central: &Central,
    args: &DeviceArgs,
    characteristic: &str,
    as_string: bool,
    config: &Config,
) -> Result<()> {
    let characteristic = parse_characteristic(characteristic)?;
    let device = find_device(central, args, config).await?;

    let value = device
        .read(characteristic)
        .await
        .with_context(|| format!("Failed to read {} from {}", characteristic, device.name()))?;
    release(&device).await;

    let Some(value) = value else {
        bail!(
            "{} has no characteristic {}.\n\
             If its service is not advertised, pass it with --service <UUID>.",
            device.name(),
            characteristic
        );
    };
    print_line(&format_value(&value, as_string))
}
