/**
 * PEER REGISTRY - Registre des systèmes de traitement connus du kernel
 *
 * RÔLE : Associe l'identité d'un pair (son system_uri) à son endpoint et à sa
 * dernière registration. Une seule entrée par identité, la re-registration écrase.
 *
 * FONCTIONNEMENT :
 * - Un seul Mutex autour de la map, tenu uniquement le temps de la copie/mutation
 * - snapshot() copie les entrées : le fan-out ne garde jamais le verrou pendant l'I/O
 * - sweep() est réservé à l'ExpirySweeper, les handlers HTTP ne suppriment rien
 */

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::info;

use crate::models::PeerView;

/// Adresse de l'interface de requête d'un pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerEndpoint {
    pub system_uri: String,
    pub port: u16,
}

impl PeerEndpoint {
    pub fn new(system_uri: impl Into<String>, port: u16) -> Self {
        Self { system_uri: system_uri.into(), port }
    }

    /// URL de requête : "{system_uri}:{port}{path}", http:// ajouté si pas de schéma
    pub fn query_url(&self, path: &str) -> String {
        let base = self.system_uri.trim_end_matches('/');
        if base.contains("://") {
            format!("{}:{}{}", base, self.port, path)
        } else {
            format!("http://{}:{}{}", base, self.port, path)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub identity: String,
    pub endpoint: PeerEndpoint,
    pub last_seen: OffsetDateTime,
}

impl PeerRecord {
    pub fn to_view(&self, now: OffsetDateTime) -> PeerView {
        let age = (now - self.last_seen).whole_seconds().max(0);
        PeerView {
            system_uri: self.endpoint.system_uri.clone(),
            port: self.endpoint.port,
            last_seen: self
                .last_seen
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            age_seconds: age,
        }
    }

    fn is_expired(&self, now: OffsetDateTime, retention: time::Duration) -> bool {
        now - self.last_seen > retention
    }
}

pub type PeersMap = HashMap<String, PeerRecord>;

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<PeersMap>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insère ou écrase le pair `identity`, last_seen = maintenant
    pub fn register(&self, identity: &str, endpoint: PeerEndpoint) -> PeerRecord {
        self.register_at(identity, endpoint, OffsetDateTime::now_utc())
    }

    pub(crate) fn register_at(
        &self,
        identity: &str,
        endpoint: PeerEndpoint,
        now: OffsetDateTime,
    ) -> PeerRecord {
        let record = PeerRecord {
            identity: identity.to_string(),
            endpoint,
            last_seen: now,
        };

        self.peers.lock().insert(identity.to_string(), record.clone());

        info!(
            "[registry] registered peer {} (port {})",
            record.identity, record.endpoint.port
        );
        record
    }

    /// Copie instantanée des pairs, sûre à itérer sans verrou
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.peers.lock().values().cloned().collect()
    }

    /// Supprime les pairs dont `now - last_seen > retention`, retourne les identités évincées
    pub fn sweep(&self, now: OffsetDateTime, retention: Duration) -> Vec<String> {
        let retention = to_time_duration(retention);
        let mut evicted = Vec::new();

        self.peers.lock().retain(|identity, record| {
            if record.is_expired(now, retention) {
                evicted.push(identity.clone());
                false
            } else {
                true
            }
        });

        for identity in &evicted {
            info!("[registry] deleted expired peer: {}", identity);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

}

/// Sature au lieu de boucler en négatif pour les rétentions énormes
fn to_time_duration(d: Duration) -> time::Duration {
    time::Duration::try_from(d).unwrap_or(time::Duration::MAX)
}
