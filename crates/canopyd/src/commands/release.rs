use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use canopy_bundle::AssetBundle;
use canopy_canary::Notification;
use canopy_edge::EdgeServer;
use canopy_release::ReleasePipeline;

pub async fn run(
    config_path: &Path,
    data_dir: &Path,
    code_ref: &str,
    serve: bool,
) -> anyhow::Result<()> {
    let topology = Arc::new(super::open_topology(config_path, data_dir)?);
    let base = config_path.parent().unwrap_or(Path::new("."));
    let bundle = AssetBundle::from_config(&topology.config.build, base);

    // The canary only sees errors from traffic this process serves.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = if serve {
        let addr: SocketAddr = topology
            .config
            .edge
            .listen
            .parse()
            .with_context(|| format!("invalid edge.listen '{}'", topology.config.edge.listen))?;
        let server = EdgeServer::new(addr, topology.router.clone());
        Some(tokio::spawn(server.serve(shutdown_rx)))
    } else {
        None
    };

    let mut notifications = topology.controller.subscribe();
    tokio::spawn(async move {
        while let Ok(note) = notifications.recv().await {
            print_notification(&note);
        }
    });

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling the canary");
            let _ = cancel_tx.send(true);
        }
    });

    let pipeline = ReleasePipeline::new(topology, bundle);
    let result = pipeline.run(code_ref, cancel_rx).await;

    let _ = shutdown_tx.send(true);
    if let Some(server) = server {
        server.await.context("edge server task panicked")??;
    }

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Release failed: {e}");
            return Err(e.into());
        }
    };

    println!(
        "✓ Uploaded {} file(s), generation {}",
        outcome.upload.keys.len(),
        outcome.upload.generation
    );
    let record = &outcome.deployment;
    match &record.new_version {
        Some(version) => println!("  Deployment {}: {} ({})", record.id, record.state, version),
        None => println!("  Deployment {}: {}", record.id, record.state),
    }
    if let Some(reason) = &record.reason {
        println!("  Reason: {reason}");
    }
    match &outcome.endpoint {
        Ok(parameter) => println!("  Endpoint: {} = {}", parameter.name, parameter.value),
        Err(warning) => println!("  Warning: {warning}"),
    }
    info!(deployment = %record.id, state = %record.state, "release finished");
    Ok(())
}

fn print_notification(note: &Notification) {
    match note {
        Notification::Started { deployment, function } => {
            println!("→ {deployment}: rolling out {function}")
        }
        Notification::Baking {
            deployment,
            version,
            weight,
        } => println!("→ {deployment}: v{version} baking at {weight}"),
        Notification::Promoted {
            deployment,
            version,
        } => println!("✓ {deployment}: v{version} promoted"),
        Notification::RolledBack { deployment, reason } => {
            println!("✗ {deployment}: rolled back ({reason})")
        }
    }
}
