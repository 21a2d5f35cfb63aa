//! Subrosa Seed Node
//!
//! A bare overlay node that serves as an entry point for peers joining the
//! network. It carries no messaging identity and no front-ends; it just
//! routes, stores, and stays up.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use subrosa_crypto::NodeId;
use subrosa_dht::OverlayNode;

/// Subrosa Seed Node
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// UDP listen address
    #[arg(short, long, default_value = "0.0.0.0:8335")]
    listen: String,

    /// Other seed nodes to join through (comma-separated)
    #[arg(short, long)]
    bootstrap: Option<String>,

    /// Node ID file path (random ephemeral ID when omitted)
    #[arg(short, long)]
    identity: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Subrosa seed node...");

    // Load or generate the node ID
    let node_id = if let Some(path) = &args.identity {
        if std::path::Path::new(path).exists() {
            let data = std::fs::read(path)?;
            if data.len() != 20 {
                return Err(anyhow::anyhow!("Invalid identity file format"));
            }
            let mut bytes = [0u8; 20];
            bytes.copy_from_slice(&data);
            NodeId::from_bytes(bytes)
        } else {
            let node_id = NodeId::random();
            std::fs::write(path, node_id.as_bytes())?;
            info!("Generated new node ID and saved to {}", path);
            node_id
        }
    } else {
        info!("No identity file specified, using ephemeral node ID");
        NodeId::random()
    };

    info!("Node ID: {:?}", node_id);

    let seeds: Vec<SocketAddr> = if let Some(bootstrap) = &args.bootstrap {
        bootstrap
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect()
    } else {
        Vec::new()
    };

    let mut node = OverlayNode::bind(node_id, &args.listen).await?;
    node.start();
    node.bootstrap(&seeds).await?;

    // Stats and maintenance loop
    loop {
        tokio::time::sleep(Duration::from_secs(60)).await;

        node.maintenance_tick().await;

        let range = node.range().await;
        info!(
            "Stats: {} contacts, {:.3} estimated key-space coverage",
            range.peers, range.coverage
        );
    }
}
