//! Thin argv translator: maps a handful of subcommands onto
//! `Manager`/control-channel calls. No domain logic lives here — it
//! dispatches a remote command over the bus first, and only falls back to
//! the local singleton `Manager` if that dispatch fails.

use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use dusa_collection_utils::core::errors::ErrorArrayItem;

use crate::bus::Bus;
use crate::control::{send_command, ControlCommand, ControlResponse};
use crate::facade;

const WATCH_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "process-fleet")]
#[command(about = "Thin CLI front-end for the process-fleet supervisor")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Render the process table.
    Ps {
        /// Repaint every 2 seconds instead of printing once.
        #[arg(long)]
        watch: bool,
    },
    /// Start a registered process.
    Start { name: String },
    /// Stop a running process.
    Stop { name: String },
    /// Restart a process.
    Restart { name: String },
    /// Invoke a registered service factory by name.
    Register { service: String },
    /// List registered service names.
    Services,
}

/// Runs `command` against `bus` (preferred) with a fall-back to the local
/// singleton `Manager`, and returns the process exit code to report.
pub async fn run(command: Command, bus: Option<&dyn Bus>) -> i32 {
    match command {
        Command::Ps { watch } => {
            if watch {
                loop {
                    print_table(bus).await;
                    tokio::time::sleep(WATCH_INTERVAL).await;
                }
            } else {
                print_table(bus).await;
                0
            }
        }
        Command::Start { name } => dispatch_action(bus, "start", &name).await,
        Command::Stop { name } => dispatch_action(bus, "stop", &name).await,
        Command::Restart { name } => dispatch_action(bus, "restart", &name).await,
        Command::Register { service } => match facade::start_service(&service).await {
            Ok(()) => {
                println!("started service {}", service);
                0
            }
            Err(err) => fail(&err),
        },
        Command::Services => match facade::get_available_services().await {
            Ok(names) => {
                for name in names {
                    println!("{}", name);
                }
                0
            }
            Err(err) => fail(&err),
        },
    }
}

async fn dispatch_action(bus: Option<&dyn Bus>, action: &str, name: &str) -> i32 {
    let command = ControlCommand {
        action: action.to_owned(),
        name: Some(name.to_owned()),
    };

    if let Some(bus) = bus {
        if let Ok(response) = send_command(bus, &command).await {
            return report(response);
        }
    }

    // Bus dispatch unavailable or failed: fall back to the local Manager.
    let result = match action {
        "start" => facade::start(name).await,
        "stop" => facade::stop(name).await,
        "restart" => facade::restart(name).await,
        _ => unreachable!(),
    };

    match result {
        Ok(()) => {
            println!("{} {}", action, name);
            0
        }
        Err(err) => fail(&err),
    }
}

async fn print_table(bus: Option<&dyn Bus>) -> i32 {
    let statuses = if let Some(bus) = bus {
        match send_command(bus, &ControlCommand { action: "status".to_owned(), name: None }).await {
            Ok(ControlResponse { statuses: Some(statuses), .. }) => statuses,
            _ => match facade::get_all_status().await {
                Ok(statuses) => statuses,
                Err(err) => return fail(&err),
            },
        }
    } else {
        match facade::get_all_status().await {
            Ok(statuses) => statuses,
            Err(err) => return fail(&err),
        }
    };

    let mut names: Vec<&String> = statuses.keys().collect();
    names.sort();
    for name in names {
        let status = &statuses[name];
        let indicator = match status.as_str() {
            "running" => "●".green(),
            "killed" => "●".red(),
            _ => "●".yellow(),
        };
        println!("{} {:<24} {}", indicator, name, status);
    }
    0
}

fn report(response: ControlResponse) -> i32 {
    if let Some(message) = &response.message {
        println!("{}", message);
    }
    if let Some(statuses) = &response.statuses {
        let mut names: Vec<&String> = statuses.keys().collect();
        names.sort();
        for name in names {
            println!("{:<24} {}", name, statuses[name]);
        }
    }
    if response.success {
        0
    } else {
        1
    }
}

fn fail(err: &ErrorArrayItem) -> i32 {
    eprintln!("{}", err.to_string().red());
    1
}
