/*!
Pair de traitement simulé pour développement sans vrais systèmes

Démarre un vrai serveur HTTP qui accepte les requêtes du kernel sur
`/api/signals/server` (multipart wifi_data + ble_data), enregistre les scans reçus
et répond selon un comportement choisi : pourcentage, blocage, JSON invalide, erreur HTTP.

Chaque stub écoute sur sa propre adresse loopback (127.0.0.N) : le kernel identifie
les pairs par system_uri, deux stubs ne doivent donc pas partager la même.
*/

use anyhow::Result;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const QUERY_PATH: &str = "/api/signals/server";

static NEXT_LOOPBACK: AtomicU8 = AtomicU8::new(0);

/// Comportement du stub à chaque requête
#[derive(Debug, Clone, PartialEq)]
pub enum PeerBehavior {
    /// Répond {"percentage_processed": n}
    Report(i64),
    /// Ne répond jamais (dans le temps d'un test)
    Hang,
    /// 200 avec un corps qui n'est pas du JSON
    Garbage,
    /// Statut HTTP d'erreur, sans corps
    Status(u16),
}

/// Scans reçus par le stub, tels qu'envoyés par le kernel
#[derive(Debug, Clone, Default)]
pub struct ReceivedQuery {
    pub wifi_data: String,
    pub ble_data: String,
}

#[derive(Clone)]
struct StubState {
    behavior: PeerBehavior,
    received: Arc<Mutex<Vec<ReceivedQuery>>>,
}

pub struct StubPeer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<ReceivedQuery>>>,
    server: JoinHandle<()>,
}

impl StubPeer {
    pub async fn spawn(behavior: PeerBehavior) -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        let received = Arc::new(Mutex::new(Vec::new()));
        let state = StubState { behavior: behavior.clone(), received: received.clone() };
        let app = Router::new()
            .route(QUERY_PATH, post(handle_query))
            .with_state(state);

        let listener = TcpListener::bind((next_loopback(), 0)).await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("stub peer stopped: {}", e);
            }
        });

        log::info!("🧪 Stub peer on {} ({:?})", addr, behavior);
        Ok(Self { addr, received, server })
    }

    /// system_uri à enregistrer auprès du kernel (sans port)
    pub fn system_uri(&self) -> String {
        format!("http://{}", self.addr.ip())
    }

    /// Identité sous laquelle le kernel connaît ce stub
    pub fn identity(&self) -> String {
        self.system_uri()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn received(&self) -> Vec<ReceivedQuery> {
        self.received.lock().unwrap().clone()
    }

    pub fn hits(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

impl Drop for StubPeer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn next_loopback() -> Ipv4Addr {
    let n = NEXT_LOOPBACK.fetch_add(1, Ordering::Relaxed);
    Ipv4Addr::new(127, 0, 0, 2 + n % 250)
}

async fn handle_query(State(state): State<StubState>, mut multipart: Multipart) -> Response {
    let mut query = ReceivedQuery::default();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().map(str::to_string);
        let text = field.text().await.unwrap_or_default();
        match name.as_deref() {
            Some("wifi_data") => query.wifi_data = text,
            Some("ble_data") => query.ble_data = text,
            _ => {}
        }
    }
    state.received.lock().unwrap().push(query);

    match state.behavior {
        PeerBehavior::Report(percentage) => {
            Json(serde_json::json!({ "percentage_processed": percentage })).into_response()
        }
        PeerBehavior::Hang => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
        PeerBehavior::Garbage => (StatusCode::OK, "definitely not json").into_response(),
        PeerBehavior::Status(code) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}
