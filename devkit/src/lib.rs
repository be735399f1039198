/*!
# Signal DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant le test du kernel sans vrais systèmes de traitement :
- Pair de traitement simulé (HTTP réel, comportement configurable)
- Fixtures de scans WiFi / BLE au format CSV
*/

pub mod fixtures;
pub mod peer_stub;

pub use peer_stub::{PeerBehavior, ReceivedQuery, StubPeer, QUERY_PATH};
