use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use canopy_edge::EdgeServer;

pub async fn run(config_path: &Path, data_dir: &Path) -> anyhow::Result<()> {
    let topology = super::open_topology(config_path, data_dir)?;
    let addr: SocketAddr = topology
        .config
        .edge
        .listen
        .parse()
        .with_context(|| format!("invalid edge.listen '{}'", topology.config.edge.listen))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
        }
        let _ = shutdown_tx.send(true);
    });

    EdgeServer::new(addr, topology.router.clone())
        .serve(shutdown_rx)
        .await?;
    info!("canopyd stopped");
    Ok(())
}
