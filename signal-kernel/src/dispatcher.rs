/**
 * FAN-OUT DISPATCHER - Diffusion des scans vers tous les pairs enregistrés
 *
 * RÔLE :
 * Pour chaque pair d'un snapshot du registre, envoie les deux datasets (wifi, ble)
 * et attend un unique pourcentage traité, dans un délai borné.
 *
 * FONCTIONNEMENT :
 * - Une tâche tokio par pair, au plus `max_in_flight` en vol (buffer_unordered)
 * - Chaque appel est borné par `timeout` ; pas de retry, une tentative par pair
 * - Toute erreur d'un pair devient QueryOutcome::Absent pour CE pair uniquement
 * - dispatch() attend la totalité des appels avant de rendre la main
 *
 * TRANSPORT :
 * Le trait PeerTransport isole le protocole ; HttpPeerTransport parle multipart/JSON
 * via un reqwest::Client partagé entre toutes les requêtes.
 */

use futures::future::{BoxFuture, FutureExt};
use futures::{stream, StreamExt};
use reqwest::multipart::{Form, Part};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::intake::{Dataset, BLE_FIELD, WIFI_FIELD};
use crate::models::SignalResponse;
use crate::registry::{PeerEndpoint, PeerRecord};

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),
    #[error("peer did not answer within {0:?}")]
    Timeout(Duration),
    #[error("malformed peer response: {0}")]
    MalformedResponse(String),
    /// Statut HTTP hors 2xx : le corps n'est pas lu, le pair compte comme absent
    /// même s'il a joint un percentage_processed à sa réponse d'erreur.
    #[error("peer rejected query with status {0}")]
    Rejected(u16),
    #[error("failed to encode query: {0}")]
    Encode(String),
}

/// Résultat d'un pair pour une inquiry : une valeur, ou une absence
#[derive(Debug)]
pub enum QueryOutcome {
    Reported(i64),
    Absent(PeerError),
}

impl QueryOutcome {
    pub fn value(&self) -> Option<i64> {
        match self {
            QueryOutcome::Reported(v) => Some(*v),
            QueryOutcome::Absent(_) => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, QueryOutcome::Absent(_))
    }
}

#[derive(Debug)]
pub struct PeerOutcome {
    pub identity: String,
    pub outcome: QueryOutcome,
}

/// Les deux scans encodés une seule fois, partagés par tous les appels d'une inquiry
#[derive(Debug, Clone)]
pub struct QueryPayload {
    pub wifi_csv: Vec<u8>,
    pub ble_csv: Vec<u8>,
}

impl QueryPayload {
    pub fn encode(wifi: &Dataset, ble: &Dataset) -> Result<Self, PeerError> {
        let wifi_csv = wifi.to_csv().map_err(|e| PeerError::Encode(e.to_string()))?;
        let ble_csv = ble.to_csv().map_err(|e| PeerError::Encode(e.to_string()))?;
        Ok(Self { wifi_csv, ble_csv })
    }
}

/// Canal requête/réponse vers un pair
pub trait PeerTransport: Send + Sync {
    fn query<'a>(
        &'a self,
        endpoint: &'a PeerEndpoint,
        payload: &'a QueryPayload,
    ) -> BoxFuture<'a, Result<i64, PeerError>>;
}

pub struct HttpPeerTransport {
    client: reqwest::Client,
    query_path: String,
    timeout: Duration,
}

impl HttpPeerTransport {
    pub fn new(query_path: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, query_path: query_path.into(), timeout })
    }

    fn form(payload: &QueryPayload) -> Result<Form, PeerError> {
        let wifi = Part::bytes(payload.wifi_csv.clone())
            .file_name("wifi_data.csv")
            .mime_str("text/csv")
            .map_err(|e| PeerError::Encode(e.to_string()))?;
        let ble = Part::bytes(payload.ble_csv.clone())
            .file_name("ble_data.csv")
            .mime_str("text/csv")
            .map_err(|e| PeerError::Encode(e.to_string()))?;
        Ok(Form::new().part(WIFI_FIELD, wifi).part(BLE_FIELD, ble))
    }

    fn classify(&self, err: reqwest::Error) -> PeerError {
        if err.is_timeout() {
            PeerError::Timeout(self.timeout)
        } else {
            PeerError::Unreachable(err.to_string())
        }
    }
}

impl PeerTransport for HttpPeerTransport {
    fn query<'a>(
        &'a self,
        endpoint: &'a PeerEndpoint,
        payload: &'a QueryPayload,
    ) -> BoxFuture<'a, Result<i64, PeerError>> {
        async move {
            let url = endpoint.query_url(&self.query_path);
            let form = Self::form(payload)?;

            let resp = self
                .client
                .post(&url)
                .multipart(form)
                .send()
                .await
                .map_err(|e| self.classify(e))?;

            if !resp.status().is_success() {
                return Err(PeerError::Rejected(resp.status().as_u16()));
            }

            let body = resp.bytes().await.map_err(|e| self.classify(e))?;
            let signal: SignalResponse = serde_json::from_slice(&body)
                .map_err(|e| PeerError::MalformedResponse(e.to_string()))?;
            Ok(signal.percentage_processed)
        }
        .boxed()
    }
}

pub struct Dispatcher {
    transport: Arc<dyn PeerTransport>,
    timeout: Duration,
    max_in_flight: usize,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn PeerTransport>, timeout: Duration, max_in_flight: usize) -> Self {
        Self { transport, timeout, max_in_flight: max_in_flight.max(1) }
    }

    /// Interroge chaque pair du snapshot ; rend un outcome par pair, après jointure complète
    pub async fn dispatch(&self, peers: &[PeerRecord], wifi: &Dataset, ble: &Dataset) -> Vec<PeerOutcome> {
        if peers.is_empty() {
            return Vec::new();
        }

        let payload = match QueryPayload::encode(wifi, ble) {
            Ok(payload) => Arc::new(payload),
            Err(e) => {
                warn!("[dispatch] cannot encode datasets: {}", e);
                return peers
                    .iter()
                    .map(|peer| PeerOutcome {
                        identity: peer.identity.clone(),
                        outcome: QueryOutcome::Absent(PeerError::Encode(e.to_string())),
                    })
                    .collect();
            }
        };

        stream::iter(peers.iter().cloned())
            .map(|peer| self.spawn_query(peer, payload.clone()))
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await
    }

    fn spawn_query(&self, peer: PeerRecord, payload: Arc<QueryPayload>) -> impl std::future::Future<Output = PeerOutcome> {
        let identity = peer.identity.clone();
        let transport = self.transport.clone();
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            let call = transport.query(&peer.endpoint, &payload);
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(percentage)) => QueryOutcome::Reported(percentage),
                Ok(Err(e)) => QueryOutcome::Absent(e),
                Err(_) => QueryOutcome::Absent(PeerError::Timeout(timeout)),
            }
        });

        async move {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => QueryOutcome::Absent(PeerError::Unreachable(format!("query task failed: {e}"))),
            };

            match &outcome {
                QueryOutcome::Reported(v) => debug!("[dispatch] {} reported {}%", identity, v),
                QueryOutcome::Absent(e) => warn!("[dispatch] {} -> absent ({})", identity, e),
            }
            PeerOutcome { identity, outcome }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PeerRegistry;
    use parking_lot::Mutex;
    use signal_devkit::{fixtures, PeerBehavior, StubPeer};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Transport en mémoire : comportement choisi par port
    #[derive(Default)]
    struct FakeTransport {
        behaviors: HashMap<u16, PeerBehavior>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_seen: AtomicUsize,
        payloads: Mutex<Vec<QueryPayload>>,
    }

    impl FakeTransport {
        fn with(behaviors: &[(u16, PeerBehavior)]) -> Self {
            Self { behaviors: behaviors.iter().cloned().collect(), ..Default::default() }
        }
    }

    impl PeerTransport for FakeTransport {
        fn query<'a>(
            &'a self,
            endpoint: &'a PeerEndpoint,
            payload: &'a QueryPayload,
        ) -> BoxFuture<'a, Result<i64, PeerError>> {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.payloads.lock().push(payload.clone());
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(now, Ordering::SeqCst);

                tokio::time::sleep(Duration::from_millis(20)).await;
                let result = match self.behaviors.get(&endpoint.port) {
                    Some(PeerBehavior::Report(v)) => Ok(*v),
                    Some(PeerBehavior::Hang) => {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(100)
                    }
                    Some(PeerBehavior::Garbage) => Err(PeerError::MalformedResponse("garbage".into())),
                    Some(PeerBehavior::Status(code)) => Err(PeerError::Rejected(*code)),
                    None => Err(PeerError::Unreachable("connection refused".into())),
                };

                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                result
            }
            .boxed()
        }
    }

    fn peers(ports: &[u16]) -> Vec<PeerRecord> {
        let registry = PeerRegistry::new();
        for port in ports {
            registry.register(&format!("peer-{port}"), PeerEndpoint::new("http://127.0.0.1", *port));
        }
        registry.snapshot()
    }

    fn datasets() -> (Dataset, Dataset) {
        let wifi = fixtures::wifi_scan_csv(3);
        let ble = fixtures::ble_scan_csv(2);
        crate::intake::decode(Some(wifi.as_slice()), Some(ble.as_slice())).unwrap()
    }

    fn by_identity(outcomes: Vec<PeerOutcome>) -> HashMap<String, QueryOutcome> {
        outcomes.into_iter().map(|o| (o.identity, o.outcome)).collect()
    }

    #[tokio::test]
    async fn test_empty_snapshot_issues_no_calls() {
        let transport = Arc::new(FakeTransport::default());
        let dispatcher = Dispatcher::new(transport.clone(), Duration::from_secs(1), 4);
        let (wifi, ble) = datasets();

        let outcomes = dispatcher.dispatch(&[], &wifi, &ble).await;
        assert!(outcomes.is_empty());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_peer_is_isolated_and_bounded_by_one_timeout() {
        let transport = Arc::new(FakeTransport::with(&[
            (1, PeerBehavior::Report(40)),
            (2, PeerBehavior::Hang),
            (3, PeerBehavior::Report(75)),
        ]));
        let timeout = Duration::from_millis(300);
        let dispatcher = Dispatcher::new(transport, timeout, 8);
        let (wifi, ble) = datasets();

        let started = Instant::now();
        let outcomes = dispatcher.dispatch(&peers(&[1, 2, 3]), &wifi, &ble).await;
        let elapsed = started.elapsed();

        assert_eq!(outcomes.len(), 3);
        assert!(elapsed < timeout * 2, "dispatch took {elapsed:?}");

        let outcomes = by_identity(outcomes);
        assert_eq!(outcomes["peer-1"].value(), Some(40));
        assert!(matches!(outcomes["peer-2"], QueryOutcome::Absent(PeerError::Timeout(_))));
        assert_eq!(outcomes["peer-3"].value(), Some(75));
    }

    #[tokio::test]
    async fn test_failures_stay_local() {
        let transport = Arc::new(FakeTransport::with(&[
            (1, PeerBehavior::Garbage),
            (2, PeerBehavior::Status(503)),
            (3, PeerBehavior::Report(12)),
        ]));
        let dispatcher = Dispatcher::new(transport, Duration::from_secs(2), 8);
        let (wifi, ble) = datasets();

        let outcomes = by_identity(dispatcher.dispatch(&peers(&[1, 2, 3, 4]), &wifi, &ble).await);
        assert_eq!(outcomes.len(), 4);
        assert!(matches!(outcomes["peer-1"], QueryOutcome::Absent(PeerError::MalformedResponse(_))));
        assert!(matches!(outcomes["peer-2"], QueryOutcome::Absent(PeerError::Rejected(503))));
        assert_eq!(outcomes["peer-3"].value(), Some(12));
        assert!(matches!(outcomes["peer-4"], QueryOutcome::Absent(PeerError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_in_flight_bound_is_respected() {
        let ports: Vec<u16> = (1..=10).collect();
        let behaviors: Vec<(u16, PeerBehavior)> = ports.iter().map(|p| (*p, PeerBehavior::Report(*p as i64))).collect();
        let transport = Arc::new(FakeTransport::with(&behaviors));
        let dispatcher = Dispatcher::new(transport.clone(), Duration::from_secs(2), 3);
        let (wifi, ble) = datasets();

        let outcomes = dispatcher.dispatch(&peers(&ports), &wifi, &ble).await;
        assert_eq!(outcomes.len(), 10);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 10);
        assert!(transport.max_seen.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_every_peer_gets_the_same_payload() {
        let transport = Arc::new(FakeTransport::with(&[(1, PeerBehavior::Report(1)), (2, PeerBehavior::Report(2))]));
        let dispatcher = Dispatcher::new(transport.clone(), Duration::from_secs(2), 8);
        let (wifi, ble) = datasets();

        dispatcher.dispatch(&peers(&[1, 2]), &wifi, &ble).await;
        let payloads = transport.payloads.lock();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].wifi_csv, wifi.to_csv().unwrap());
        assert_eq!(payloads[1].ble_csv, ble.to_csv().unwrap());
    }

    #[tokio::test]
    async fn test_http_transport_against_stub_peers() {
        let reporting = StubPeer::spawn(PeerBehavior::Report(40)).await.unwrap();
        let garbage = StubPeer::spawn(PeerBehavior::Garbage).await.unwrap();
        let hanging = StubPeer::spawn(PeerBehavior::Hang).await.unwrap();

        let registry = PeerRegistry::new();
        for stub in [&reporting, &garbage, &hanging] {
            registry.register(&stub.identity(), PeerEndpoint::new(stub.system_uri(), stub.port()));
        }

        let timeout = Duration::from_millis(500);
        let transport = Arc::new(HttpPeerTransport::new(signal_devkit::QUERY_PATH, timeout).unwrap());
        let dispatcher = Dispatcher::new(transport, timeout, 8);
        let (wifi, ble) = datasets();

        let outcomes = by_identity(dispatcher.dispatch(&registry.snapshot(), &wifi, &ble).await);
        assert_eq!(outcomes[&reporting.identity()].value(), Some(40));
        assert!(matches!(outcomes[&garbage.identity()], QueryOutcome::Absent(PeerError::MalformedResponse(_))));
        assert!(matches!(outcomes[&hanging.identity()], QueryOutcome::Absent(PeerError::Timeout(_))));

        let received = reporting.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].wifi_data.as_bytes(), wifi.to_csv().unwrap().as_slice());
        assert_eq!(received[0].ble_data.as_bytes(), ble.to_csv().unwrap().as_slice());
    }

    #[tokio::test]
    async fn test_http_transport_error_status_is_rejected() {
        let failing = StubPeer::spawn(PeerBehavior::Status(500)).await.unwrap();
        let transport = HttpPeerTransport::new(signal_devkit::QUERY_PATH, Duration::from_secs(1)).unwrap();
        let (wifi, ble) = datasets();
        let payload = QueryPayload::encode(&wifi, &ble).unwrap();

        let result = transport
            .query(&PeerEndpoint::new(failing.system_uri(), failing.port()), &payload)
            .await;
        assert!(matches!(result, Err(PeerError::Rejected(500))));
        assert_eq!(failing.hits(), 1);
    }

    #[tokio::test]
    async fn test_http_transport_unreachable_peer() {
        let transport = HttpPeerTransport::new("/api/signals/server", Duration::from_secs(1)).unwrap();
        let (wifi, ble) = datasets();
        let payload = QueryPayload::encode(&wifi, &ble).unwrap();

        // port 1 : rien n'écoute
        let result = transport.query(&PeerEndpoint::new("http://127.0.0.1", 1), &payload).await;
        assert!(matches!(result, Err(PeerError::Unreachable(_)) | Err(PeerError::Timeout(_))));
    }
}
