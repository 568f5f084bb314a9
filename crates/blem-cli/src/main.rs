use anyhow::Result;
use clap::Parser;

use blem_cli::cli::{Cli, Commands};
use blem_cli::commands::{cmd_read, cmd_rssi, cmd_scan, cmd_watch, cmd_write};
use blem_cli::config::Config;
use blem_cli::util::{init_tracing, open_central};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_tracing(cli.verbose, cli.quiet, &config);

    let central = open_central().await?;
    let result = match &cli.command {
        Commands::Scan {
            seconds,
            services,
            format,
        } => cmd_scan(&central, *seconds, services, *format, cli.quiet, &config).await,
        Commands::Read {
            device,
            characteristic,
            string,
        } => cmd_read(&central, device, characteristic, *string, &config).await,
        Commands::Write {
            device,
            characteristic,
            hex,
            no_response,
        } => {
            cmd_write(
                &central,
                device,
                characteristic,
                hex,
                *no_response,
                cli.quiet,
                &config,
            )
            .await
        }
        Commands::Watch {
            device,
            characteristic,
            count,
        } => cmd_watch(&central, device, characteristic, *count, cli.quiet, &config).await,
        Commands::Rssi { device } => cmd_rssi(&central, device, &config).await,
    };

    central.shutdown();
    result
}
