use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use tracing_subscriber::EnvFilter;

mod catalog;
mod commands;

#[derive(Parser)]
#[command(name = "swarm")]
#[command(author, version, about = "Supervise a swarm of message-passing services", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor
    Serve {
        /// Port the supervisor listens on
        #[arg(short, long, env = "SWARM_PORT", default_value_t = 8300)]
        port: u16,

        /// Topology file, re-read whenever it changes
        #[arg(short, long, default_value = "topology.json")]
        topology: PathBuf,

        /// Fixed topology entry NAME=COUNT; replaces the topology file
        #[arg(short, long = "service", value_parser = parse_service)]
        services: Vec<(String, usize)>,
    },

    /// Run one instance of a built-in service
    Spawn {
        /// Service name
        service: String,

        /// Supervisor host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Supervisor port
        #[arg(short, long, env = "SWARM_PORT", default_value_t = 8300)]
        port: u16,
    },

    /// Ask the supervisor to kill every instance of a service
    Kill {
        /// Service name
        service: String,

        /// Supervisor host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Supervisor port
        #[arg(short, long, env = "SWARM_PORT", default_value_t = 8300)]
        port: u16,
    },
}

fn parse_service(raw: &str) -> std::result::Result<(String, usize), String> {
    let (name, count) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=COUNT, got '{}'", raw))?;
    if name.is_empty() {
        return Err(format!("missing service name in '{}'", raw));
    }
    let count = count
        .parse()
        .map_err(|_| format!("'{}' is not an instance count", count))?;
    Ok((name.to_string(), count))
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve {
            port,
            topology,
            services,
        } => commands::serve(port, topology, services).await,
        Commands::Spawn {
            service,
            host,
            port,
        } => {
            let code = commands::spawn(&service, &host, port).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Kill {
            service,
            host,
            port,
        } => commands::kill(&service, &host, port).await,
    }
}
