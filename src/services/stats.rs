use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::services::sink::HeartbeatSink;

/// Process-wide share and connection counters, shared by every session.
///
/// Counters are lock-free atomics with relaxed ordering: a lost race shows
/// up as an approximate dashboard number, never a panic or a corrupt value.
/// `accepted + rejected <= submitted` holds at every snapshot because a
/// resolution is only recorded after its submission.
#[derive(Debug)]
pub struct ClusterStats {
    connected_miners: AtomicU64,
    shares_submitted: AtomicU64,
    shares_accepted: AtomicU64,
    shares_rejected: AtomicU64,
    started: Instant,
}

impl Default for ClusterStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStats {
    pub fn new() -> Self {
        Self {
            connected_miners: AtomicU64::new(0),
            shares_submitted: AtomicU64::new(0),
            shares_accepted: AtomicU64::new(0),
            shares_rejected: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_connect(&self) {
        self.connected_miners.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        // Saturating: a stray double-decrement must not wrap to u64::MAX.
        self.connected_miners
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .ok();
    }

    pub fn record_submitted(&self) {
        self.shares_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolved(&self, accepted: bool) {
        if accepted {
            self.shares_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.shares_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn connected_miners(&self) -> u64 {
        self.connected_miners.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connected_miners: self.connected_miners.load(Ordering::Relaxed),
            shares_submitted: self.shares_submitted.load(Ordering::Relaxed),
            shares_accepted: self.shares_accepted.load(Ordering::Relaxed),
            shares_rejected: self.shares_rejected.load(Ordering::Relaxed),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }
}

/// Point-in-time view of the cluster counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub connected_miners: u64,
    pub shares_submitted: u64,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
    pub uptime_seconds: u64,
}

/// Stable identity of this relay process within the cluster.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub id: String,
    pub hostname: String,
}

impl NodeIdentity {
    /// `<hostname>-<random hex>`: stable for the process lifetime, unique
    /// across restarts so a stale heartbeat row ages out instead of being
    /// overwritten with mixed-lifetime numbers.
    pub fn generate() -> Self {
        let hostname =
            sysinfo::System::host_name().unwrap_or_else(|| "stratum-bridge".to_string());
        let id = format!("{}-{:08x}", hostname, rand::random::<u32>());
        Self { id, hostname }
    }
}

/// Periodically push the stats snapshot through the heartbeat sink.
/// Failures are logged and dropped; the next tick resends current state.
pub fn spawn_heartbeat(
    stats: Arc<ClusterStats>,
    sink: Arc<dyn HeartbeatSink>,
    node: NodeIdentity,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let snapshot = stats.snapshot();
            if let Err(e) = sink.report_health(&node, &snapshot).await {
                debug!("heartbeat dropped: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_lifecycle() {
        let stats = ClusterStats::new();

        stats.record_connect();
        stats.record_connect();
        stats.record_disconnect();
        assert_eq!(stats.connected_miners(), 1);

        stats.record_submitted();
        stats.record_submitted();
        stats.record_resolved(true);
        stats.record_resolved(false);

        let snap = stats.snapshot();
        assert_eq!(snap.shares_submitted, 2);
        assert_eq!(snap.shares_accepted, 1);
        assert_eq!(snap.shares_rejected, 1);
        assert!(snap.shares_accepted + snap.shares_rejected <= snap.shares_submitted);
    }

    #[test]
    fn disconnect_never_wraps() {
        let stats = ClusterStats::new();
        stats.record_disconnect();
        assert_eq!(stats.connected_miners(), 0);
    }

    #[test]
    fn concurrent_updates_do_not_lose_the_invariant() {
        let stats = Arc::new(ClusterStats::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(std::thread::spawn(move || {
                for i in 0..1000 {
                    stats.record_submitted();
                    stats.record_resolved(i % 2 == 0);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.shares_submitted, 8000);
        assert_eq!(snap.shares_accepted + snap.shares_rejected, 8000);
    }

    #[test]
    fn node_identity_embeds_hostname() {
        let node = NodeIdentity::generate();
        assert!(node.id.starts_with(&node.hostname));
        assert!(node.id.len() > node.hostname.len());
    }
}
