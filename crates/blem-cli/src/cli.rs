//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// How to find the target device
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Device identity, peripheral id (MAC address or platform UUID), or part of its name
    pub device: String,

    /// Scan window used to find the device, in seconds
    #[arg(short, long)]
    pub seconds: Option<u64>,

    /// Service to discover after connecting (16-bit, 32-bit or full UUID); repeatable
    #[arg(long = "service", value_name = "UUID")]
    pub services: Vec<String>,
}

#[derive(Debug, Parser)]
#[command(name = "blem")]
#[command(author, version, about = "Talk to Bluetooth Low Energy peripherals", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file to use instead of the default location
    #[arg(short, long, global = true, env = "BLEM_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan for nearby peripherals
    Scan {
        /// Scan duration in seconds
        #[arg(short, long)]
        seconds: Option<u64>,

        /// Only report peripherals advertising this service; repeatable
        #[arg(long = "service", value_name = "UUID")]
        services: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Read a characteristic
    Read {
        #[command(flatten)]
        device: DeviceArgs,

        /// Characteristic UUID
        characteristic: String,

        /// Print the value as UTF-8 text instead of hex
        #[arg(long)]
        string: bool,
    },

    /// Write a characteristic
    Write {
        #[command(flatten)]
        device: DeviceArgs,

        /// Characteristic UUID
        characteristic: String,

        /// Payload as hex, e.g. 01ff or 01:ff
        hex: String,

        /// Write without waiting for the peripheral's response
        #[arg(long)]
        no_response: bool,
    },

    /// Print notifications from a characteristic
    Watch {
        #[command(flatten)]
        device: DeviceArgs,

        /// Characteristic UUID
        characteristic: String,

        /// Stop after this many values (0 for unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u64,
    },

    /// Read the signal strength of a connected device
    Rssi {
        #[command(flatten)]
        device: DeviceArgs,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_scan_defaults() {
        let cli = Cli::try_parse_from(["blem", "scan"]).unwrap();
        match cli.command {
            Commands::Scan {
                seconds,
                services,
                format,
            } => {
                assert_eq!(seconds, None);
                assert!(services.is_empty());
                assert_eq!(format, OutputFormat::Text);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_scan_services() {
        let cli = Cli::try_parse_from([
            "blem", "scan", "-s", "3", "--service", "180f", "--service", "180d", "-f", "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Scan {
                seconds,
                services,
                format,
            } => {
                assert_eq!(seconds, Some(3));
                assert_eq!(services, vec!["180f", "180d"]);
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_read() {
        let cli = Cli::try_parse_from(["blem", "read", "Sensor", "2a19", "--string"]).unwrap();
        match cli.command {
            Commands::Read {
                device,
                characteristic,
                string,
            } => {
                assert_eq!(device.device, "Sensor");
                assert_eq!(characteristic, "2a19");
                assert!(string);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_write_no_response() {
        let cli = Cli::try_parse_from([
            "blem",
            "write",
            "AA:BB:CC:DD:EE:FF",
            "2a06",
            "01",
            "--no-response",
            "--service",
            "1802",
        ])
        .unwrap();
        match cli.command {
            Commands::Write {
                device,
                hex,
                no_response,
                ..
            } => {
                assert_eq!(device.services, vec!["1802"]);
                assert_eq!(hex, "01");
                assert!(no_response);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_watch_count() {
        let cli = Cli::try_parse_from(["blem", "watch", "hr", "2a37", "-n", "5"]).unwrap();
        assert!(matches!(cli.command, Commands::Watch { count: 5, .. }));
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["blem", "rssi", "hr", "--quiet", "--config", "/tmp/blem.toml"]).unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/blem.toml")));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["blem", "-v", "-q", "scan"]).is_err());
    }

    #[test]
    fn test_write_requires_payload() {
        assert!(Cli::try_parse_from(["blem", "write", "hr", "2a06"]).is_err());
    }
}
