//! Binary entry point for the `cli` feature: parses argv, opens a
//! short-lived bus connection if `PROCESS_FLEET_BUS_URLS` is set, and
//! dispatches through [`process_fleet::cli::run`].

use std::time::Duration;

use clap::Parser;
use process_fleet::bus::{Bus, NatsBus};
use process_fleet::cli::{self, Cli};

/// `NatsBus::connect` retries its initial connect forever; the CLI wants the
/// opposite — dispatch remotely when a bus is reachable, else fall back to
/// the local Manager immediately rather than hang.
const BUS_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let bus: Option<Box<dyn Bus>> = match std::env::var("PROCESS_FLEET_BUS_URLS") {
        Ok(urls) => match tokio::time::timeout(BUS_PROBE_TIMEOUT, NatsBus::connect(&urls)).await {
            Ok(Ok(bus)) => Some(Box::new(bus)),
            Ok(Err(_)) | Err(_) => None,
        },
        Err(_) => None,
    };

    let exit_code = cli::run(cli.command, bus.as_deref()).await;
    std::process::exit(exit_code);
}
