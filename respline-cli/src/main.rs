//! respline-cli - Command-line interface for Redis-compatible servers
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use respline_client::{
    Client, ConnectionConfig, GeoProbe, GeoRadiusOptions, GeoUnit, ReconnectPolicy, SortOrder,
};
use respline_protocol::DEFAULT_PORT;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "respline-cli")]
#[command(about = "Command-line interface for Redis-compatible servers")]
#[command(version)]
struct Cli {
    /// Server host
    #[arg(short = 'H', long, env = "RESPLINE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, env = "RESPLINE_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// How geo support is detected: "live" (GEOADD probe) or "version"
    #[arg(long, default_value = "live")]
    geo_probe: GeoProbe,

    /// Reconnect attempts after the connection fails (0 disables reconnecting)
    #[arg(long, default_value_t = 0)]
    reconnect: u32,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start interactive REPL
    Repl,

    /// Ping the server
    Ping,

    /// Get server info
    Info {
        /// Only this section
        section: Option<String>,
    },

    /// Show the server version and detected capabilities
    Version,

    /// Add members to a geo set: <lon> <lat> <member> [<lon> <lat> <member> ...]
    Geoadd {
        key: String,

        #[arg(required = true, num_args = 3.., allow_negative_numbers = true)]
        points: Vec<String>,
    },

    /// Get the geohash of members
    Geohash {
        key: String,

        #[arg(required = true)]
        members: Vec<String>,
    },

    /// Get the position of members
    Geopos {
        key: String,

        #[arg(required = true)]
        members: Vec<String>,
    },

    /// Get the distance between two members
    Geodist {
        key: String,
        member1: String,
        member2: String,

        /// Unit: m, km, mi or ft
        #[arg(short, long)]
        unit: Option<GeoUnit>,
    },

    /// Find members within a radius of a position
    Georadius {
        key: String,

        #[arg(allow_negative_numbers = true)]
        longitude: f64,

        #[arg(allow_negative_numbers = true)]
        latitude: f64,

        radius: f64,

        /// Unit: m, km, mi or ft
        #[arg(default_value = "m")]
        unit: GeoUnit,

        #[command(flatten)]
        options: RadiusArgs,
    },

    /// Find members within a radius of another member
    Georadiusbymember {
        key: String,
        member: String,
        radius: f64,

        /// Unit: m, km, mi or ft
        #[arg(default_value = "m")]
        unit: GeoUnit,

        #[command(flatten)]
        options: RadiusArgs,
    },

    /// Send a command as-is and print the reply
    Raw {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Args, Clone)]
pub(crate) struct RadiusArgs {
    /// Include the distance from the center
    #[arg(long)]
    withdist: bool,

    /// Include member coordinates
    #[arg(long)]
    withcoord: bool,

    /// Include the raw geohash
    #[arg(long)]
    withhash: bool,

    /// Return at most this many members
    #[arg(long)]
    count: Option<u64>,

    /// Sort by distance: asc or desc
    #[arg(long)]
    order: Option<SortOrder>,
}

impl RadiusArgs {
    pub(crate) fn to_options(&self) -> GeoRadiusOptions {
        GeoRadiusOptions {
            with_dist: self.withdist,
            with_coord: self.withcoord,
            with_hash: self.withhash,
            count: self.count,
            order: self.order,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ConnectionConfig::new(&cli.host, cli.port)
        .with_request_timeout(Duration::from_secs(cli.timeout))
        .with_geo_probe(cli.geo_probe);
    if cli.reconnect > 0 {
        config = config.with_reconnect(ReconnectPolicy::new(
            cli.reconnect,
            Duration::from_millis(500),
        ));
    }

    let client = Client::connect(config).await.map_err(|e| {
        eprintln!(
            "{} {}:{}: {}",
            "Connection failed".red(),
            cli.host,
            cli.port,
            e
        );
        e
    })?;

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(&client, cli.json).await?;
        }
        Some(cmd) => {
            let result = commands::execute(&client, cmd, cli.json).await;

            match result {
                Ok(output) => {
                    println!("{}", output);
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    let _ = client.disconnect().await;
                    std::process::exit(1);
                }
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}
