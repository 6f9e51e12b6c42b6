use clap::Parser;
use dns_mesh::config::{DEFAULT_DISCOVERY_PORT, DEFAULT_PROTOCOL_PORT, DEFAULT_SERVICE_NAME};
use dns_mesh::membership::types::NodeId;
use dns_mesh::status::handlers::router;
use dns_mesh::{ClusterConfig, ClusterNode};
use std::net::{IpAddr, SocketAddr};
use tracing_subscriber::EnvFilter;

/// Gossip-replicated DNS record store node.
#[derive(Parser, Debug)]
#[command(name = "dns-mesh")]
#[command(version)]
#[command(about = "Discovers peer DNS servers and keeps their records in sync")]
struct Args {
    /// Unique node id (random UUID when omitted)
    #[arg(long, env = "NODE_ID")]
    node_id: Option<String>,

    /// UDP port for discovery announcements
    #[arg(long, env = "DISCOVERY_PORT", default_value_t = DEFAULT_DISCOVERY_PORT)]
    discovery_port: u16,

    /// UDP port for the membership and sync protocol
    #[arg(long, env = "PROTOCOL_PORT", default_value_t = DEFAULT_PROTOCOL_PORT)]
    protocol_port: u16,

    /// Disable to keep records local and bind no sockets
    #[arg(long, env = "ENABLE_SYNC", default_value_t = true, action = clap::ArgAction::Set)]
    enable_sync: bool,

    /// Address advertised to peers
    #[arg(long, env = "HOST_IP", default_value = "127.0.0.1")]
    host_ip: IpAddr,

    /// Address the UDP sockets bind to
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    bind_address: IpAddr,

    /// Announcements from other services are ignored
    #[arg(long, env = "SERVICE_NAME", default_value = DEFAULT_SERVICE_NAME)]
    service_name: String,

    /// Unicast discovery destinations (default: limited broadcast)
    #[arg(long, env = "DISCOVERY_TARGETS", value_delimiter = ',')]
    discovery_targets: Vec<SocketAddr>,

    /// Protocol addresses to join at startup
    #[arg(long, env = "SEEDS", value_delimiter = ',')]
    seeds: Vec<SocketAddr>,

    /// HTTP admin API listen address
    #[arg(long, env = "STATUS_ADDR", default_value = "0.0.0.0:5000")]
    status_addr: SocketAddr,
}

impl Args {
    fn into_config(self) -> ClusterConfig {
        let node_id = self.node_id.map(NodeId).unwrap_or_default();
        let mut config = ClusterConfig::new(node_id);
        config.discovery_port = self.discovery_port;
        config.protocol_port = self.protocol_port;
        config.enable_sync = self.enable_sync;
        config.host_ip = self.host_ip;
        config.bind_ip = self.bind_address;
        config.service_name = self.service_name;
        config.discovery_targets = self.discovery_targets;
        config.seeds = self.seeds;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let status_addr = args.status_addr;
    let config = args.into_config();

    if config.seeds.is_empty() {
        tracing::info!("No seeds configured, relying on discovery");
    } else {
        tracing::info!("Seed nodes: {:?}", config.seeds);
    }

    let node = ClusterNode::start(config).await?;
    tracing::info!("Node ID: {}", node.node_id());

    let app = router(node.clone());
    let listener = tokio::net::TcpListener::bind(status_addr).await?;
    tracing::info!("HTTP admin API listening on {}", status_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await?;

    node.shutdown().await;
    Ok(())
}
