//! svcreg - command line client for the multicast service registry
//!
//! Registers a node and keeps it advertised until interrupted, or queries and
//! watches the services visible on the local network.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use svcreg::{
    DeregisterOptions, GetOptions, ListOptions, MdnsRegistry, Node, RegisterOptions, Registry,
    RegistryConfig, Service, WatchOptions,
};
use tracing::{info, warn};

/// Multicast DNS service registry client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (missing file means defaults)
    #[arg(short, long, default_value = "config/svcreg.yaml")]
    config: PathBuf,

    /// Domain to operate in (defaults to the configured default domain)
    #[arg(short, long, global = true)]
    domain: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Advertise a node until interrupted
    Register {
        /// Service name
        service: String,

        /// Service version
        #[arg(long, default_value = "latest")]
        version: String,

        /// Node id
        #[arg(long)]
        id: String,

        /// Node address as host:port
        #[arg(long)]
        address: String,

        /// Node metadata as key=value, repeatable
        #[arg(long = "meta", value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,
    },

    /// Print every version of a service
    Get {
        /// Service name
        service: String,
    },

    /// Print the names of the visible services
    List,

    /// Print service changes until interrupted
    Watch {
        /// Only report this service
        #[arg(long)]
        service: Option<String>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = RegistryConfig::from_config_builder(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
    let registry = MdnsRegistry::new(config).context("Failed to start mDNS registry")?;

    match args.command {
        Command::Register {
            service,
            version,
            id,
            address,
            metadata,
        } => {
            let node = metadata
                .into_iter()
                .fold(Node::new(id, address), |node, (key, value)| node.with_metadata(key, value));
            let service = Service::new(service, version).with_node(node);

            registry
                .register(&service, RegisterOptions { domain: args.domain.clone() })
                .await?;
            info!(service = %service.name, "Registered, press Ctrl-C to deregister");

            tokio::signal::ctrl_c().await?;

            if let Err(e) = registry
                .deregister(&service, DeregisterOptions { domain: args.domain })
                .await
            {
                warn!(error = %e, "Deregister failed");
            }
        }

        Command::Get { service } => {
            let services = registry
                .get_service(&service, GetOptions { domain: args.domain })
                .await?;
            println!("{}", serde_json::to_string_pretty(&services)?);
        }

        Command::List => {
            let services = registry.list_services(ListOptions { domain: args.domain }).await?;
            for service in services {
                println!("{}", service.name);
            }
        }

        Command::Watch { service } => {
            let watcher = registry
                .watch(WatchOptions {
                    service,
                    domain: args.domain,
                })
                .await?;

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    result = watcher.next() => {
                        let result = result?;
                        println!("{}", serde_json::to_string(&result)?);
                    }
                }
            }
        }
    }

    Ok(())
}
