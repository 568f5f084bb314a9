//! Command-line interface for the blem BLE operation orchestrator.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | List nearby peripherals |
//! | `read` | Read a characteristic |
//! | `write` | Write a characteristic |
//! | `watch` | Print notifications from a characteristic |
//! | `rssi` | Read the signal strength of a device |
//!
//! Devices are named by their stable identity, their peripheral id (MAC
//! address or platform UUID) or any part of their advertised name.
//!
//! # Configuration
//!
//! Defaults live in `~/.config/blem/config.toml` (or the platform equivalent,
//! or the file given with `--config` / `BLEM_CONFIG`):
//!
//! - `[scan]`: `seconds`, `services`
//! - `[device]`: `auto_discover_services`
//! - `[logging]`: `level`
//!
//! # Examples
//!
//! ```bash
//! blem scan --seconds 10 --service 180d
//! blem read "Polar H10" 2a19
//! blem write AA:BB:CC:DD:EE:FF 2a06 01 --service 1802 --no-response
//! blem watch "Polar H10" 2a37 --count 20
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod util;

pub use blem_core;
pub use blem_types;
