/**
 * EXPIRY SWEEPER - Balayage périodique des pairs expirés
 *
 * Boucle Sleeping → Sweeping → Sleeping, sans état terminal hors arrêt du process.
 * La tâche appartient au kernel (SweeperHandle) : shutdown() l'arrête proprement,
 * et sweep_now() permet aux tests de déclencher un passage sans attendre l'horloge.
 */

use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::registry::PeerRegistry;

/// Borne haute de l'intervalle : `Instant::now() + interval` ne doit pas déborder
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Clone)]
pub struct ExpirySweeper {
    registry: Arc<PeerRegistry>,
    retention: Duration,
}

pub struct SweeperHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ExpirySweeper {
    pub fn new(registry: Arc<PeerRegistry>, retention: Duration) -> Self {
        Self { registry, retention }
    }

    /// Un passage de balayage, retourne les identités évincées
    pub fn sweep_now(&self) -> Vec<String> {
        self.registry.sweep(OffsetDateTime::now_utc(), self.retention)
    }

    /// Lance la boucle ; le premier balayage a lieu après un intervalle complet
    pub fn spawn(self, interval: Duration) -> SweeperHandle {
        let interval = interval.clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL);
        info!(
            "[sweeper] starting (interval: {}s, retention: {}s)",
            interval.as_secs(),
            self.retention.as_secs()
        );

        let (stop, mut stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let now = tokio::time::Instant::now();
            let start = now.checked_add(interval).unwrap_or(now);
            let mut ticker = tokio::time::interval_at(start, interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = self.sweep_now();
                        info!(
                            "[sweeper] sweep done: {} evicted, {} remaining",
                            evicted.len(),
                            self.registry.len()
                        );
                    }
                    // stop explicite ou handle abandonné
                    _ = &mut stopped => break,
                }
            }
            info!("[sweeper] stopped");
        });

        SweeperHandle { stop, task }
    }
}

impl SweeperHandle {
    /// Arrête la boucle ; false si la tâche s'était déjà terminée anormalement
    pub async fn shutdown(self) -> bool {
        let _ = self.stop.send(());
        match self.task.await {
            Ok(()) => true,
            Err(e) => {
                warn!("[sweeper] task ended abnormally: {}", e);
                false
            }
        }
    }
}
