use anyhow::Result;
use clap::{Parser, Subcommand};
use ipnet::Ipv4Net;
use netctl_core::Config;

mod commands;

#[derive(Parser)]
#[command(name = "netctl", version = env!("NETCTL_BUILD_VERSION"))]
#[command(about = "Create and delete isolated libvirt networks", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a network on a free private subnet, or reactivate an existing one
    Create {
        /// Network name
        #[arg(short, long)]
        name: String,

        /// Seed subnet in CIDR notation (e.g., 192.168.39.0/24)
        #[arg(short = 's', long, value_parser = parse_cidr)]
        subnet_cidr: Ipv4Net,

        /// Bridge name (defaults to the configured bridge)
        #[arg(short, long)]
        bridge: Option<String>,

        /// libvirt connection URI (defaults to the configured URI)
        #[arg(short, long)]
        uri: Option<String>,
    },

    /// Delete a network that no domain references
    Delete {
        /// Network name
        #[arg(short, long)]
        name: String,

        /// libvirt connection URI (defaults to the configured URI)
        #[arg(short, long)]
        uri: Option<String>,
    },

    /// Show the subnet parameters derived from an address or CIDR
    Inspect {
        /// IPv4 address or CIDR
        address: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn parse_cidr(value: &str) -> std::result::Result<Ipv4Net, String> {
    value.parse::<Ipv4Net>().map_err(|e| format!("{}: expected CIDR such as 192.168.39.0/24", e))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    if let Err(e) = netctl_core::init_observability(cli.verbose, &config.log_level) {
        eprintln!("failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Create { name, subnet_cidr, bridge, uri } => {
            let bridge = bridge.unwrap_or_else(|| config.bridge.clone());
            let uri = uri.unwrap_or_else(|| config.connection_uri.clone());
            commands::network::create(&config, &name, subnet_cidr, &bridge, &uri).await?;
        }

        Commands::Delete { name, uri } => {
            let uri = uri.unwrap_or_else(|| config.connection_uri.clone());
            commands::network::delete(&config, &name, &uri).await?;
        }

        Commands::Inspect { address, json } => {
            commands::network::inspect(&address, json)?;
        }
    }

    Ok(())
}
