/**
 * SIGNAL KERNEL - Point d'entrée du nœud de coordination
 *
 * RÔLE : Bootstrap de tous les modules : config, registre des pairs, sweeper,
 * dispatcher, API HTTP. Les pairs s'enregistrent, les clients soumettent une paire
 * de scans (WiFi + BLE) qui est diffusée à tous les pairs ; le meilleur pourcentage
 * traité est renvoyé.
 *
 * CYCLE DE VIE : le sweeper appartient au kernel et s'arrête après le serveur HTTP
 * (Ctrl-C → arrêt gracieux → shutdown du sweeper).
 */

mod aggregator;
mod config;
mod coordinator;
mod dispatcher;
mod health;
mod http;
mod intake;
mod models;
mod registry;
mod sweeper;

use crate::config::load_config;
use crate::coordinator::Coordinator;
use crate::http::AppState;
use crate::registry::PeerRegistry;
use crate::sweeper::ExpirySweeper;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;
    info!(
        "[kernel] config: retention {}s, sweep every {}s, peer timeout {}s, max in flight {}",
        cfg.registry.retention_secs,
        cfg.sweep_interval().as_secs(),
        cfg.dispatch.peer_timeout_secs,
        cfg.max_in_flight()
    );

    // registre partagé entre handlers et sweeper
    let registry = Arc::new(PeerRegistry::new());
    let sweeper = ExpirySweeper::new(registry.clone(), cfg.retention()).spawn(cfg.sweep_interval());

    let coordinator = Arc::new(
        Coordinator::from_config(&cfg, registry).context("failed to build peer HTTP client")?,
    );

    let app = http::build_router(AppState { coordinator }, cfg.intake.max_upload_bytes);

    let listener = TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("failed to bind {}", cfg.listen))?;
    info!("[kernel] listening on http://{}", cfg.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    sweeper.shutdown().await;
    info!("[kernel] stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("[kernel] failed to listen for ctrl-c: {}", e);
        // sans signal, on sert indéfiniment
        std::future::pending::<()>().await;
    }
    info!("[kernel] shutdown requested");
}
