/**
 * COORDINATOR - Point d'entrée métier du kernel
 *
 * RÔLE : register() pour les pairs, inquire() pour les clients.
 * inquire = snapshot du registre → fan-out → agrégation (max, absences = 0).
 * Seules les erreurs de décodage client remontent ; les erreurs pairs restent
 * contenues dans le dispatcher.
 */

use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregator::aggregate;
use crate::config::KernelConfig;
use crate::dispatcher::{Dispatcher, HttpPeerTransport, PeerOutcome, PeerTransport};
use crate::health::{HealthTracker, KernelHealth};
use crate::intake::{DecodeError, Dataset};
use crate::models::{PeerView, RegisterRequest};
use crate::registry::{PeerEndpoint, PeerRecord, PeerRegistry};

#[derive(Debug)]
pub struct InquiryReport {
    pub percentage: i64,
    pub outcomes: Vec<PeerOutcome>,
}

impl InquiryReport {
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_absent()).count()
    }

    /// Identités des pairs absents, triées
    pub fn absent_peers(&self) -> Vec<&str> {
        let mut absent: Vec<&str> = self
            .outcomes
            .iter()
            .filter(|o| o.outcome.is_absent())
            .map(|o| o.identity.as_str())
            .collect();
        absent.sort_unstable();
        absent
    }
}

pub struct Coordinator {
    registry: Arc<PeerRegistry>,
    dispatcher: Dispatcher,
    health: HealthTracker,
}

pub type SharedCoordinator = Arc<Coordinator>;

impl Coordinator {
    pub fn new(registry: Arc<PeerRegistry>, dispatcher: Dispatcher) -> Self {
        Self { registry, dispatcher, health: HealthTracker::new() }
    }

    /// Kernel branché sur le transport HTTP réel
    pub fn from_config(cfg: &KernelConfig, registry: Arc<PeerRegistry>) -> anyhow::Result<Self> {
        let transport: Arc<dyn PeerTransport> =
            Arc::new(HttpPeerTransport::new(cfg.dispatch.query_path.clone(), cfg.peer_timeout())?);
        let dispatcher = Dispatcher::new(transport, cfg.peer_timeout(), cfg.max_in_flight());
        Ok(Self::new(registry, dispatcher))
    }

    /// Aucune validation de joignabilité : toujours acquitté
    pub fn register(&self, req: RegisterRequest) -> PeerRecord {
        let endpoint = PeerEndpoint::new(req.system_uri.clone(), req.port);
        self.registry.register(&req.system_uri, endpoint)
    }

    /// Vue d'inspection, triée par identité
    pub fn peers_view(&self) -> BTreeMap<String, PeerView> {
        let now = OffsetDateTime::now_utc();
        self.registry
            .snapshot()
            .into_iter()
            .map(|record| (record.identity.clone(), record.to_view(now)))
            .collect()
    }

    pub async fn inquire(&self, wifi: Dataset, ble: Dataset) -> InquiryReport {
        let inquiry_id = Uuid::new_v4();
        let peers = self.registry.snapshot();

        info!(
            "[inquiry {}] wifi: {} rows, ble: {} rows, {} peers",
            inquiry_id,
            wifi.len(),
            ble.len(),
            peers.len()
        );
        for row in wifi.rows() {
            debug!("[inquiry {}] wifi {:?}", inquiry_id, row);
        }
        for row in ble.rows() {
            debug!("[inquiry {}] ble {:?}", inquiry_id, row);
        }

        let outcomes = self.dispatcher.dispatch(&peers, &wifi, &ble).await;
        let percentage = aggregate(outcomes.iter().map(|o| &o.outcome));
        let report = InquiryReport { percentage, outcomes };

        let total = self
            .health
            .record_inquiry(report.outcomes.len() as u64, report.failed() as u64);
        info!(
            "[inquiry {}] percentage_processed: {} ({} peers, absent: {:?}); {} peer queries since start",
            inquiry_id,
            report.percentage,
            report.outcomes.len(),
            report.absent_peers(),
            total
        );
        report
    }

    pub fn reject(&self, err: &DecodeError) {
        self.health.record_rejection();
        info!("[inquiry] rejected: {}", err);
    }

    pub fn health(&self) -> KernelHealth {
        self.health.get_health(&self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{PeerError, QueryPayload};
    use futures::future::{BoxFuture, FutureExt};
    use std::time::Duration;

    /// Chaque pair répond son port comme pourcentage ; port 0 = injoignable
    struct PortEcho;

    impl PeerTransport for PortEcho {
        fn query<'a>(
            &'a self,
            endpoint: &'a PeerEndpoint,
            _payload: &'a QueryPayload,
        ) -> BoxFuture<'a, Result<i64, PeerError>> {
            async move {
                match endpoint.port {
                    0 => Err(PeerError::Unreachable("refused".into())),
                    port => Ok(port as i64),
                }
            }
            .boxed()
        }
    }

    fn coordinator() -> Coordinator {
        let dispatcher = Dispatcher::new(Arc::new(PortEcho), Duration::from_secs(1), 4);
        Coordinator::new(Arc::new(PeerRegistry::new()), dispatcher)
    }

    fn register(c: &Coordinator, uri: &str, port: u16) {
        c.register(RegisterRequest { system_uri: uri.into(), port });
    }

    #[tokio::test]
    async fn test_inquiry_without_peers_is_zero() {
        let c = coordinator();
        let report = c.inquire(Dataset::default(), Dataset::default()).await;
        assert_eq!(report.percentage, 0);
        assert!(report.outcomes.is_empty());
        assert_eq!(c.health().inquiries_served, 1);
    }

    #[tokio::test]
    async fn test_inquiry_takes_max_and_counts_failures() {
        let c = coordinator();
        register(&c, "http://a", 40);
        register(&c, "http://b", 0);
        register(&c, "http://c", 75);

        let report = c.inquire(Dataset::default(), Dataset::default()).await;
        assert_eq!(report.percentage, 75);
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.absent_peers(), vec!["http://b"]);

        let health = c.health();
        assert_eq!(health.peer_queries, 3);
        assert_eq!(health.peer_queries_failed, 1);
    }

    #[tokio::test]
    async fn test_reregistration_replaces_endpoint() {
        let c = coordinator();
        register(&c, "http://a", 10);
        register(&c, "http://a", 90);

        let view = c.peers_view();
        assert_eq!(view.len(), 1);
        assert_eq!(view["http://a"].port, 90);

        let report = c.inquire(Dataset::default(), Dataset::default()).await;
        assert_eq!(report.percentage, 90);
    }
}
