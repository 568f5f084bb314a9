//! Watch command implementation.
//!
//! Subscribes one observer to the characteristic and prints every value with
//! its arrival time until the count is reached, the link drops or Ctrl-C.

use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc;

use blem_core::{Central, Observer, OwnerContext};

use crate::cli::DeviceArgs;
use crate::config::Config;
use crate::util::{find_device, format_value, parse_characteristic, print_line, release};

enum Notification {
    Value(Bytes),
    Error(String),
    Stopped,
}

/// One output line: RFC 3339 timestamp and hex payload.
pub(crate) fn watch_line(at: OffsetDateTime, value: &[u8]) -> String {
    let stamp = at.format(&Rfc3339).unwrap_or_else(|_| at.unix_timestamp().to_string());
    format!("{} {}", stamp, format_value(value, false))
}

pub async fn cmd_watch(
    central: &Central,
    args: &DeviceArgs,
    characteristic: &str,
    count: u64,
    quiet: bool,
    config: &Config,
) -> Result<()> {
    let characteristic = parse_characteristic(characteristic)?;
    let device = find_device(central, args, config).await?;
    device
        .discover()
        .await
        .with_context(|| format!("Failed to discover {}", device.name()))?;

    let owner = OwnerContext::new();
    let _guard = owner.guard();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let errors = tx.clone();
    let stopped = tx.clone();
    device
        .subscribe(
            Observer::new(characteristic)
                .on_data(move |value| {
                    let _ = tx.send(Notification::Value(value.clone()));
                })
                .on_error(move |e| {
                    let _ = errors.send(Notification::Error(e.to_string()));
                })
                .on_stopped(move || {
                    let _ = stopped.send(Notification::Stopped);
                })
                .owned_by(&owner),
        )
        .await
        .with_context(|| format!("Failed to subscribe to {}", characteristic))?;

    if !quiet {
        eprintln!("Watching {} on {} (Ctrl-C to stop)...", characteristic, device.name());
    }

    let mut received = 0u64;
    let outcome = loop {
        if count > 0 && received >= count {
            break Ok(());
        }
        let next = tokio::select! {
            next = rx.recv() => next,
            _ = tokio::signal::ctrl_c() => break Ok(()),
        };
        match next {
            Some(Notification::Value(value)) => {
                print_line(&watch_line(OffsetDateTime::now_utc(), &value))?;
                received += 1;
            }
            Some(Notification::Error(error)) => tracing::warn!("Notification error: {}", error),
            Some(Notification::Stopped) | None => {
                break Err(anyhow!("Connection to {} lost", device.name()));
            }
        }
    };

    release(&device).await;
    if !quiet {
        eprintln!("Received {} value(s).", received);
    }
    outcome
}
