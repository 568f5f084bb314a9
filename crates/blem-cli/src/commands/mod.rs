//! Command implementations for the CLI.

mod read;
mod rssi;
mod scan;
mod watch;
mod write;

pub use read::cmd_read;
pub use rssi::cmd_rssi;
pub use scan::{ScanRow, cmd_scan};
pub use watch::cmd_watch;
pub use write::cmd_write;
