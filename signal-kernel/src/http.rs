/**
 * API REST SIGNAL KERNEL - Surface HTTP du nœud de coordination
 *
 * ROUTES :
 * - GET  /health            : liveness
 * - GET  /system/health     : compteurs du kernel (pairs, inquiries, requêtes pairs)
 * - POST /api/register      : registration d'un pair {system_uri, port}
 * - GET  /api/register      : inspection du registre (lecture seule, snapshot)
 * - POST /api/inquiry       : multipart wifi_data + ble_data → {success, percentage_processed}
 *
 * Les erreurs de décodage client donnent un 400 ; les erreurs des pairs ne sortent jamais d'ici.
 */

use axum::body::Bytes;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::{routing::{get, post}, Json, Router};
use std::collections::BTreeMap;
use tracing::info;

use crate::coordinator::SharedCoordinator;
use crate::health::KernelHealth;
use crate::intake::{self, DecodeError, BLE_FIELD, WIFI_FIELD};
use crate::models::{InquiryResponse, PeerView, RegisterRequest, RegisterResponse};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: SharedCoordinator,
}

pub fn build_router(app_state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/api/register", post(register_peer).get(list_peers))
        .route("/api/inquiry", post(inquiry))
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

// POST /api/register
async fn register_peer(
    State(app): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Json<RegisterResponse> {
    app.coordinator.register(req);
    Json(RegisterResponse { message: "Success".into() })
}

// GET /api/register (inspection)
async fn list_peers(State(app): State<AppState>) -> Json<BTreeMap<String, PeerView>> {
    let peers = app.coordinator.peers_view();
    info!("[http] sent registry snapshot ({} peers)", peers.len());
    Json(peers)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.coordinator.health())
}

// POST /api/inquiry
async fn inquiry(
    State(app): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> (StatusCode, Json<InquiryResponse>) {
    let decoded = match multipart {
        Ok(multipart) => match collect_parts(multipart).await {
            Ok((wifi, ble)) => intake::decode(wifi.as_deref(), ble.as_deref()),
            Err(e) => Err(e),
        },
        Err(rejection) => Err(DecodeError::Multipart(rejection.body_text())),
    };

    match decoded {
        Ok((wifi, ble)) => {
            let report = app.coordinator.inquire(wifi, ble).await;
            (StatusCode::OK, Json(InquiryResponse::processed(report.percentage)))
        }
        Err(e) => {
            app.coordinator.reject(&e);
            (StatusCode::BAD_REQUEST, Json(InquiryResponse::rejected(e.to_string())))
        }
    }
}

/// Récupère les parts wifi_data / ble_data, ignore les autres
async fn collect_parts(mut multipart: Multipart) -> Result<(Option<Bytes>, Option<Bytes>), DecodeError> {
    let mut wifi = None;
    let mut ble = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DecodeError::Multipart(e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        let slot = match name.as_deref() {
            Some(WIFI_FIELD) => &mut wifi,
            Some(BLE_FIELD) => &mut ble,
            _ => continue,
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| DecodeError::Multipart(e.body_text()))?;
        *slot = Some(data);
    }

    Ok((wifi, ble))
}
