//! flyover-hook: command-line client for the flyover daemon.
//!
//! Feeders call `record` once per decoded aircraft message. The query
//! subcommands print what the daemon knows about a transponder address.
//!
//! ## Subcommands
//!
//! - `record`: report a sighting
//! - `count`: sessions observed for an address
//! - `previous-end`: when the last closed session ended
//! - `health`: daemon liveness

mod daemon_client;

use clap::{Parser, Subcommand};
use daemon_client::DaemonClient;
use flyover_protocol::Method;
use serde_json::{json, Value};
use std::env;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flyover-hook")]
#[command(about = "Report aircraft sightings to the flyover daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a sighting of an aircraft
    Record {
        /// ICAO 24-bit transponder address in hex
        #[arg(value_name = "HEX")]
        hex: String,

        #[arg(long)]
        manufacturer: Option<String>,

        /// Aircraft type designation (e.g. 737-800)
        #[arg(long = "type", value_name = "TYPE")]
        aircraft_type: Option<String>,
    },

    /// Print how many sessions have been observed for an aircraft
    Count {
        #[arg(value_name = "HEX")]
        hex: String,
    },

    /// Print when the aircraft's previous session ended (epoch ms, 0 if never)
    PreviousEnd {
        #[arg(value_name = "HEX")]
        hex: String,
    },

    /// Check that the daemon is running
    Health,
}

impl Commands {
    fn into_call(self) -> (Method, Option<Value>) {
        match self {
            Commands::Record {
                hex,
                manufacturer,
                aircraft_type,
            } => {
                let aircraft = if manufacturer.is_none() && aircraft_type.is_none() {
                    Value::Null
                } else {
                    json!({ "manufacturer": manufacturer, "type": aircraft_type })
                };
                (
                    Method::RecordSighting,
                    Some(json!({ "hex": hex, "aircraft": aircraft })),
                )
            }
            Commands::Count { hex } => (Method::GetSightingCount, Some(json!({ "hex": hex }))),
            Commands::PreviousEnd { hex } => {
                (Method::GetPreviousSessionEnd, Some(json!({ "hex": hex })))
            }
            Commands::Health => (Method::GetHealth, None),
        }
    }
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let client = match DaemonClient::from_env() {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(error = %err, "Failed to resolve daemon socket");
            std::process::exit(1);
        }
    };

    let (method, params) = cli.command.into_call();
    match client.call(method, params) {
        Ok(data) => println!("{}", data),
        Err(err) => {
            tracing::error!(error = %err, method = ?method, "flyover-hook request failed");
            std::process::exit(1);
        }
    }
}

/// Logs go to stderr so stdout stays parseable.
fn init_logging() {
    let debug_enabled = env::var("FLYOVER_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
