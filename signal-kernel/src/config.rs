use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

use crate::sweeper::MAX_SWEEP_INTERVAL;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub listen: SocketAddr,
    pub registry: RegistryConf,
    pub dispatch: DispatchConf,
    pub intake: IntakeConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RegistryConf {
    pub retention_secs: u64,      // 24h par défaut
    pub sweep_interval_secs: u64, // 1h par défaut
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DispatchConf {
    pub peer_timeout_secs: u64,
    pub max_in_flight: usize,
    pub query_path: String, // ex: "/api/signals/server"
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct IntakeConf {
    pub max_upload_bytes: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            registry: RegistryConf::default(),
            dispatch: DispatchConf::default(),
            intake: IntakeConf::default(),
        }
    }
}

impl Default for RegistryConf {
    fn default() -> Self {
        Self { retention_secs: 24 * 60 * 60, sweep_interval_secs: 60 * 60 }
    }
}

impl Default for DispatchConf {
    fn default() -> Self {
        Self {
            peer_timeout_secs: 5,
            max_in_flight: 64,
            query_path: "/api/signals/server".into(),
        }
    }
}

impl Default for IntakeConf {
    fn default() -> Self {
        Self { max_upload_bytes: 10 << 20 }
    }
}

impl KernelConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.registry.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        // un intervalle nul ferait paniquer tokio::time::interval
        Duration::from_secs(self.registry.sweep_interval_secs.max(1)).min(MAX_SWEEP_INTERVAL)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.peer_timeout_secs)
    }

    pub fn max_in_flight(&self) -> usize {
        self.dispatch.max_in_flight.max(1)
    }
}

/// Parse un kernel.yaml; un fichier vide donne la config par défaut
pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config_from<P: AsRef<Path>>(path: P) -> KernelConfig {
    let path = path.as_ref();
    if !path.exists() {
        warn!("[kernel] pas de {}, usage config par défaut", path.display());
        return KernelConfig::default();
    }

    let txt = fs::read_to_string(path).await.unwrap_or_default();
    parse_config(&txt).unwrap_or_else(|e| {
        warn!("[kernel] config invalide: {e}");
        KernelConfig::default()
    })
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("SIGNAL_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = load_config_from(&path).await;
    apply_listen_override(&mut cfg, std::env::var("SIGNAL_KERNEL_LISTEN").ok());
    cfg
}

/// SIGNAL_KERNEL_LISTEN prime sur le fichier ; une adresse invalide est ignorée
fn apply_listen_override(cfg: &mut KernelConfig, listen: Option<String>) {
    let Some(listen) = listen else { return };
    match listen.parse() {
        Ok(addr) => cfg.listen = addr,
        Err(e) => warn!("[kernel] SIGNAL_KERNEL_LISTEN invalide ({listen}): {e}"),
    }
}
