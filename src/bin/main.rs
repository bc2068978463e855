//! node-dns binary entry point.

use clap::Parser;
use node_dns::{telemetry, Config, DnsServer};
use std::path::PathBuf;
use tracing::{error, info};

/// Authoritative DNS server for Kubernetes cluster node names.
#[derive(Parser, Debug)]
#[command(name = "node-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "node-dns.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let mut config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("NODE_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;
    config.dns.validate()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        listen_addr = %config.dns.listen_addr,
        zones = ?config.dns.zones,
        "starting node-dns"
    );

    let server = DnsServer::new(config.dns);
    if let Err(err) = server.run().await {
        error!(%err, "DNS server error");
        return Err(err.into());
    }

    info!("node-dns shutdown complete");
    Ok(())
}
