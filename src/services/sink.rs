use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::routing::Algorithm;
use crate::services::stats::{NodeIdentity, StatsSnapshot};

/// Everything known about a share at the moment it is submitted.
#[derive(Debug, Clone)]
pub struct ShareEvent {
    pub pool: String,
    pub algorithm: Algorithm,
    /// Difficulty after the per-algorithm recording policy is applied.
    pub difficulty: f64,
    /// Raw session difficulty as last announced by the upstream.
    pub upstream_difficulty: f64,
    pub network_difficulty: f64,
    pub block_height: u64,
    /// Address part of the worker label (before the first dot).
    pub miner: String,
    /// Worker part of the label (after the first dot, may be empty).
    pub worker: String,
    /// The full client-declared label.
    pub label: String,
    pub source_ip: String,
    pub listen_port: u16,
    pub timestamp: DateTime<Utc>,
}

/// Resolution of a previously submitted share.
#[derive(Debug, Clone)]
pub struct ShareOutcome {
    pub pool: String,
    pub label: String,
    pub difficulty: f64,
    pub accepted: bool,
    pub timestamp: DateTime<Utc>,
}

/// Receives share lifecycle events. Implementations persist them somewhere;
/// the relay only guarantees exactly one submission event per observed
/// `mining.submit` and at most one resolution per tracked id.
#[async_trait]
pub trait ShareSink: Send + Sync {
    async fn submit_share(&self, event: &ShareEvent) -> Result<()>;
    async fn resolve_share(&self, outcome: &ShareOutcome) -> Result<()>;
}

/// Receives the periodic cluster health snapshot.
#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn report_health(&self, node: &NodeIdentity, snapshot: &StatsSnapshot) -> Result<()>;
}

/// Sink used when no database is configured.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl ShareSink for NullSink {
    async fn submit_share(&self, _event: &ShareEvent) -> Result<()> {
        Ok(())
    }

    async fn resolve_share(&self, _outcome: &ShareOutcome) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl HeartbeatSink for NullSink {
    async fn report_health(&self, _node: &NodeIdentity, _snapshot: &StatsSnapshot) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
enum SinkEvent {
    Submitted(ShareEvent),
    Resolved(ShareOutcome),
}

/// Non-blocking front door to the share sink.
///
/// The relay hot path must never wait on storage, so events go through a
/// bounded channel consumed by a dedicated writer task. When the channel is
/// full the event is DROPPED (and counted): losing a statistics row is
/// acceptable, coupling relay latency to storage latency is not.
#[derive(Debug, Clone)]
pub struct ShareRecorder {
    tx: mpsc::Sender<SinkEvent>,
}

impl ShareRecorder {
    pub fn spawn(sink: Arc<dyn ShareSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(capacity);

        let writer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let result = match &event {
                    SinkEvent::Submitted(e) => sink.submit_share(e).await,
                    SinkEvent::Resolved(o) => sink.resolve_share(o).await,
                };
                if let Err(e) = result {
                    error!("share sink write failed: {}", e);
                }
            }
            debug!("share writer stopped");
        });

        (Self { tx }, writer)
    }

    pub fn submitted(&self, event: ShareEvent) {
        self.dispatch(SinkEvent::Submitted(event));
    }

    pub fn resolved(&self, outcome: ShareOutcome) {
        self.dispatch(SinkEvent::Resolved(outcome));
    }

    fn dispatch(&self, event: SinkEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::counter!("share_events_dropped_total").increment(1);
                warn!("share event dropped: sink queue full");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("share event dropped: sink closed");
            }
        }
    }
}
