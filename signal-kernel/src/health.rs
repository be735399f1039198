use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::registry::PeerRegistry;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub peers_registered: u32,
    pub inquiries_served: u64,
    pub inquiries_rejected: u64,
    pub peer_queries: u64,
    pub peer_queries_failed: u64,
}

pub struct HealthTracker {
    start_time: Instant,
    inquiries_served: AtomicU64,
    inquiries_rejected: AtomicU64,
    peer_queries: AtomicU64,
    peer_queries_failed: AtomicU64,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            inquiries_served: AtomicU64::new(0),
            inquiries_rejected: AtomicU64::new(0),
            peer_queries: AtomicU64::new(0),
            peer_queries_failed: AtomicU64::new(0),
        }
    }

    /// Comptabilise une inquiry servie ; retourne le total de requêtes pairs depuis le boot
    pub fn record_inquiry(&self, queried: u64, failed: u64) -> u64 {
        self.inquiries_served.fetch_add(1, Ordering::Relaxed);
        self.peer_queries_failed.fetch_add(failed, Ordering::Relaxed);
        self.peer_queries.fetch_add(queried, Ordering::Relaxed) + queried
    }

    pub fn record_rejection(&self) {
        self.inquiries_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self, registry: &PeerRegistry) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            peers_registered: registry.len() as u32,
            inquiries_served: self.inquiries_served.load(Ordering::Relaxed),
            inquiries_rejected: self.inquiries_rejected.load(Ordering::Relaxed),
            peer_queries: self.peer_queries.load(Ordering::Relaxed),
            peer_queries_failed: self.peer_queries_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
