use eyre::Result;
use paris::Logger;
use tracing_subscriber::EnvFilter;

use ar_gateway::service::{GatewayConfig, GatewayService};
use ar_gateway_chain::{ChainSource, WithPeers};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut logger = Logger::new();
    logger.info("Starting gateway data retrieval core");

    let config = GatewayConfig::default();
    let trusted = config.chain.trusted_node_url.clone();
    let service = GatewayService::start(config)?;

    logger.loading(format!("Probing trusted node {trusted}..."));
    match service.client().get_network_info().await {
        Ok(info) => {
            logger.success(format!(
                "Trusted node at height {} with {} blocks",
                info.height, info.blocks
            ));
        }
        Err(err) => {
            logger.warn(format!("Trusted node probe failed: {err}"));
        }
    }

    logger.loading("Discovering peers...");
    match service.client().refresh_peers().await {
        Ok(()) => {
            logger.success(format!("{} peers known", service.client().peer_records().len()));
        }
        Err(err) => {
            logger.warn(format!("Peer discovery failed: {err}"));
        }
    }

    logger.info("Ready. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;

    logger.loading("Shutting down...");
    service.shutdown().await;
    logger.success("Stopped");
    Ok(())
}
