//! Subrosa Daemon
//!
//! Runs one overlay node with its messaging identity, restores the last
//! state snapshot, joins the network through the configured seed peers, and
//! serves the local web and JSON-RPC front-ends.

mod config;
mod rpc;
mod web;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use subrosa_crypto::{KeyPair, NodeId};
use subrosa_dht::{OverlayNode, Snapshot};

use config::NodeConfig;

/// Subrosa Daemon
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Data directory (config, identity, state snapshot)
    #[arg(short, long, default_value = ".subrosa")]
    data_dir: PathBuf,

    /// Override the configured UDP listen port
    #[arg(short, long)]
    listen_port: Option<u16>,

    /// Extra seed peers (comma-separated host:port)
    #[arg(short, long)]
    bootstrap: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Everything a front-end handler needs, wired once at startup
#[derive(Clone)]
pub struct AppState {
    /// The running overlay node
    pub node: Arc<OverlayNode>,
    /// This installation's messaging identity
    pub keys: Arc<KeyPair>,
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

    info!("Starting Subrosa daemon...");

    tokio::fs::create_dir_all(&args.data_dir).await?;

    let config = NodeConfig::load_or_create(&args.data_dir.join("config.toml")).await?;
    config.validate()?;

    // One identity per installation, generated on first run
    let keys = load_or_generate_identity(&args.data_dir.join("identity.key")).await?;
    let node_id = NodeId::from_pubkey(&keys.public);
    info!("Node ID: {:?}", node_id);
    info!("Public key: {}", keys.public.to_hex());

    let listen_port = args.listen_port.unwrap_or(config.network.listen_port);
    let mut node = OverlayNode::bind(node_id, &format!("0.0.0.0:{}", listen_port)).await?;

    // Warm start from the last snapshot if one exists
    let snapshot_path = args.data_dir.join("state.snapshot");
    if snapshot_path.exists() {
        match Snapshot::read(&snapshot_path).await {
            Ok(snapshot) => {
                if snapshot.node_id() == node_id {
                    info!("Restoring state snapshot");
                    node.apply_snapshot(snapshot).await;
                } else {
                    warn!("Snapshot belongs to a different identity, ignoring");
                }
            }
            Err(e) => warn!("Ignoring unreadable snapshot: {}", e),
        }
    }

    node.start();
    let node = Arc::new(node);

    // Seeds from config plus the command line
    let mut seeds: Vec<SocketAddr> = config
        .bootstrap
        .nodes
        .iter()
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    if let Some(extra) = &args.bootstrap {
        seeds.extend(extra.split(',').filter_map(|s| s.trim().parse::<SocketAddr>().ok()));
    }
    node.bootstrap(&seeds).await?;

    // Graceful shutdown on ctrl-c
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    // Background maintenance: expiry, republish, bucket refresh
    let maintenance_node = node.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.tick().await;
        loop {
            interval.tick().await;
            maintenance_node.maintenance_tick().await;
        }
    });

    // Periodic state snapshots
    let snapshot_node = node.clone();
    let periodic_path = snapshot_path.clone();
    let snapshot_interval = config.storage.snapshot_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(snapshot_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = snapshot_node.snapshot().await.write(&periodic_path).await {
                warn!("Snapshot write failed: {}", e);
            }
        }
    });

    let state = AppState {
        node: node.clone(),
        keys: Arc::new(keys),
    };

    let mut servers = Vec::new();
    if config.network.web_enabled {
        servers.push(tokio::spawn(web::serve(
            state.clone(),
            config.network.web_port,
            shutdown_rx.clone(),
        )));
    }
    if config.network.rpc_enabled {
        servers.push(tokio::spawn(rpc::serve(
            state.clone(),
            config.network.rpc_port,
            shutdown_rx.clone(),
        )));
    }

    let mut shutdown = shutdown_rx.clone();
    let _ = shutdown.changed().await;

    for server in servers {
        if let Ok(Err(e)) = server.await {
            warn!("Front-end exited with error: {}", e);
        }
    }

    // Last-good state beats losing everything since the previous interval
    if let Err(e) = node.snapshot().await.write(&snapshot_path).await {
        warn!("Final snapshot failed: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Load the X25519 identity from disk, generating it on first run
async fn load_or_generate_identity(path: &Path) -> Result<KeyPair> {
    if path.exists() {
        let data = tokio::fs::read(path).await?;
        if data.len() != 32 {
            anyhow::bail!("Invalid identity file format");
        }
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&data);
        Ok(KeyPair::from_bytes(secret))
    } else {
        let keys = KeyPair::generate();
        tokio::fs::write(path, keys.secret.to_bytes()).await?;
        info!("Generated new identity and saved to {}", path.display());
        Ok(keys)
    }
}
