use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::protocol::messages::{MessageId, UNKNOWN_WORKER};
use crate::routing::PortConfig;

/// Unique identifier for sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectReason {
    /// Downstream closed its socket normally
    ClientDisconnect,
    /// Upstream closed its socket
    UpstreamDisconnect,
    /// No traffic in either direction within the idle timeout
    Timeout,
    /// Transport-level failure on either socket
    NetworkError { error: String },
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientDisconnect => write!(f, "client disconnect"),
            Self::UpstreamDisconnect => write!(f, "upstream disconnect"),
            Self::Timeout => write!(f, "idle timeout"),
            Self::NetworkError { error } => write!(f, "network error: {}", error),
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Upstream dial in flight
    Connecting,
    /// Both sockets open, relay running
    Active,
    /// One side closed or errored, the other being torn down
    Closing { reason: DisconnectReason },
    /// Terminal; both sockets released
    Closed { reason: DisconnectReason },
}

/// An in-flight submission awaiting its upstream response.
#[derive(Debug, Clone)]
pub struct PendingShare {
    pub worker: String,
    pub difficulty: f64,
    pub submitted_at: DateTime<Utc>,
}

/// Per-connection state shared by the two relay loops.
///
/// One `Session` pairs one downstream socket with one dedicated upstream
/// socket. Nothing here is shared across sessions.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    remote_addr: SocketAddr,
    listen_port: u16,
    port_config: PortConfig,
    created_at: Instant,
    state: RwLock<SessionState>,
    worker: RwLock<String>,
    /// f64 stored as atomic bits; updated on every upstream set_difficulty
    difficulty: AtomicU64,
    pending: DashMap<MessageId, PendingShare>,
}

impl Session {
    pub fn new(remote_addr: SocketAddr, listen_port: u16, port_config: PortConfig) -> Self {
        Self {
            id: SessionId::new(),
            remote_addr,
            listen_port,
            port_config,
            created_at: Instant::now(),
            state: RwLock::new(SessionState::Connecting),
            worker: RwLock::new(UNKNOWN_WORKER.to_string()),
            difficulty: AtomicU64::new(1.0f64.to_bits()),
            pending: DashMap::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn port_config(&self) -> &PortConfig {
        &self.port_config
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn state(&self) -> SessionState {
        self.state.read().expect("session state lock").clone()
    }

    pub fn mark_active(&self) {
        let mut state = self.state.write().expect("session state lock");
        if matches!(*state, SessionState::Connecting) {
            *state = SessionState::Active;
        }
    }

    /// Begin teardown. Idempotent: only the first caller's reason sticks,
    /// and only the first caller gets `true` back.
    pub fn close(&self, reason: DisconnectReason) -> bool {
        let mut state = self.state.write().expect("session state lock");
        match &*state {
            SessionState::Closing { .. } | SessionState::Closed { .. } => false,
            _ => {
                *state = SessionState::Closing { reason };
                true
            }
        }
    }

    /// Terminal transition once both sockets are released.
    pub fn mark_closed(&self) {
        let mut state = self.state.write().expect("session state lock");
        let reason = match &*state {
            SessionState::Closing { reason } => reason.clone(),
            SessionState::Closed { .. } => return,
            _ => DisconnectReason::ClientDisconnect,
        };
        *state = SessionState::Closed { reason };
    }

    /// Worker label captured from the most recent authorize.
    pub fn worker(&self) -> String {
        self.worker.read().expect("session worker lock").clone()
    }

    pub fn set_worker(&self, label: &str) {
        *self.worker.write().expect("session worker lock") = label.to_string();
    }

    pub fn difficulty(&self) -> f64 {
        f64::from_bits(self.difficulty.load(Ordering::Relaxed))
    }

    pub fn set_difficulty(&self, difficulty: f64) {
        self.difficulty
            .store(difficulty.to_bits(), Ordering::Relaxed);
    }

    /// Record an in-flight submission. Must be called before the rewritten
    /// submit is written upstream, so the response can never win the race
    /// against the insert.
    pub fn track_submit(&self, id: MessageId, worker: String, difficulty: f64) {
        self.pending.insert(
            id,
            PendingShare {
                worker,
                difficulty,
                submitted_at: Utc::now(),
            },
        );
    }

    /// Resolve an in-flight submission at most once. A repeated id finds
    /// nothing and yields `None` - a duplicate upstream response is not a
    /// new resolution.
    pub fn resolve_submit(&self, id: &MessageId) -> Option<PendingShare> {
        self.pending.remove(id).map(|(_, share)| share)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
