use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

use crate::config::DifficultySource;
use crate::error::Result;
use crate::manager::Manager;
use crate::network::connection::{DisconnectReason, Session};
use crate::protocol::codec::{Frame, LineDecoder};
use crate::protocol::messages::{self, METHOD_AUTHORIZE, METHOD_SUBMIT};
use crate::services::sink::{ShareEvent, ShareOutcome};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// The per-connection state machine: two read loops over a paired pair of
/// sockets, meeting at the shared `Session`.
///
/// Downstream bytes are decoded, credential-rewritten, and forwarded
/// upstream; upstream bytes are forwarded downstream verbatim BEFORE being
/// inspected for difficulty updates and share resolutions, so the miner
/// never observes bookkeeping-induced changes or delay. Either loop ending
/// (EOF, error, idle timeout) cancels the other and releases both sockets.
pub struct SessionRelay {
    manager: Arc<Manager>,
    session: Arc<Session>,
}

impl SessionRelay {
    pub fn new(manager: Arc<Manager>, session: Arc<Session>) -> Self {
        Self { manager, session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Relay until either side goes away. Returns the first teardown reason.
    pub async fn run(&self, downstream: TcpStream, upstream: TcpStream) -> Result<DisconnectReason> {
        self.session.mark_active();

        let (down_read, down_write) = downstream.into_split();
        let (up_read, up_write) = upstream.into_split();

        // Both loops run concurrently; the select drops the loser, which
        // closes its halves and completes the paired teardown.
        let reason = tokio::select! {
            reason = self.downstream_loop(down_read, up_write) => reason,
            reason = self.upstream_loop(up_read, down_write) => reason,
        };

        self.session.close(reason.clone());
        self.session.mark_closed();

        info!(
            "{} - closed: {} (worker '{}', {} unresolved submissions, lived {:.1}s)",
            self.session.id(),
            reason,
            self.session.worker(),
            self.session.pending_count(),
            self.session.age().as_secs_f64(),
        );

        Ok(reason)
    }

    /// Downstream -> upstream: decode, rewrite, forward.
    async fn downstream_loop(
        &self,
        mut reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
    ) -> DisconnectReason {
        let config = self.manager.config();
        let mut writer = BufWriter::new(writer);
        let mut decoder = LineDecoder::new(config.server.max_line_length);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = match read_chunk(config.server.idle_timeout, &mut reader, &mut buf).await {
                Ok(0) => return DisconnectReason::ClientDisconnect,
                Ok(n) => n,
                Err(reason) => return reason,
            };

            for frame in decoder.push(&buf[..n]) {
                let result = match frame {
                    Frame::Message(mut message) => {
                        match messages::method(&message) {
                            Some(METHOD_AUTHORIZE) => self.handle_authorize(&mut message),
                            Some(METHOD_SUBMIT) => self.handle_submit(&mut message),
                            _ => {}
                        }
                        write_message(&mut writer, &message).await
                    }
                    // Unparsable line: forward byte-for-byte, keep relaying.
                    Frame::Raw(bytes) => write_raw(&mut writer, &bytes).await,
                };

                if let Err(e) = result {
                    return DisconnectReason::NetworkError {
                        error: format!("upstream write: {e}"),
                    };
                }
            }
        }
    }

    /// Upstream -> downstream: forward verbatim, then inspect.
    async fn upstream_loop(
        &self,
        mut reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
    ) -> DisconnectReason {
        let config = self.manager.config();
        let mut writer = BufWriter::new(writer);
        let mut decoder = LineDecoder::new(config.server.max_line_length);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = match read_chunk(config.server.idle_timeout, &mut reader, &mut buf).await {
                Ok(0) => return DisconnectReason::UpstreamDisconnect,
                Ok(n) => n,
                Err(reason) => return reason,
            };

            // The miner sees the unmodified upstream bytes, whatever the
            // relay also does with them.
            if let Err(e) = write_raw(&mut writer, &buf[..n]).await {
                return DisconnectReason::NetworkError {
                    error: format!("downstream write: {e}"),
                };
            }

            for frame in decoder.push(&buf[..n]) {
                if let Frame::Message(message) = frame {
                    self.inspect_upstream(&message);
                }
            }
        }
    }

    fn handle_authorize(&self, message: &mut Value) {
        let config = self.manager.config();

        let label = messages::worker_label(message);
        self.session.set_worker(&label);

        let identity = config.upstream_identity(&label);
        messages::rewrite_credentials(message, &identity, &config.upstream.password);

        metrics::counter!("auth_rewritten_total").increment(1);
        info!(
            "{} - authorize '{}' from {} on {}",
            self.session.id(),
            label,
            self.session.remote_addr(),
            self.session.port_config().pool,
        );
    }

    fn handle_submit(&self, message: &mut Value) {
        let config = self.manager.config();
        let label = self.session.worker();
        let identity = config.upstream_identity(&label);

        // The ledger insert must land before the forward: once the bytes are
        // on the wire the response is free to arrive.
        if let Some(id) = messages::rewrite_submit(message, &identity) {
            self.session
                .track_submit(id, label.clone(), self.session.difficulty());
        }

        self.manager.stats().record_submitted();
        metrics::counter!("shares_submitted_total").increment(1);

        let event = self.build_share_event(&label);
        debug!(
            "{} - share from '{}' (diff {}) on {}",
            self.session.id(),
            label,
            event.upstream_difficulty,
            event.pool,
        );
        self.manager.recorder().submitted(event);
    }

    fn inspect_upstream(&self, message: &Value) {
        if let Some(difficulty) = messages::set_difficulty(message) {
            self.session.set_difficulty(difficulty);
            debug!(
                "{} - difficulty set to {} for '{}'",
                self.session.id(),
                difficulty,
                self.session.worker(),
            );
        }

        let Some((id, accepted)) = messages::response_outcome(message) else {
            return;
        };

        // Ids missing from the ledger are duplicates or responses to
        // non-submit requests; both are ignored without error.
        let Some(share) = self.session.resolve_submit(&id) else {
            trace!("{} - response id {} not tracked", self.session.id(), id);
            return;
        };

        self.manager.stats().record_resolved(accepted);

        if accepted {
            metrics::counter!("shares_accepted_total").increment(1);
            info!("{} - share accepted for '{}'", self.session.id(), share.worker);
        } else {
            metrics::counter!("shares_rejected_total").increment(1);
            info!(
                "{} - share rejected for '{}': {}",
                self.session.id(),
                share.worker,
                message
                    .get("error")
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            );
        }

        self.manager.recorder().resolved(ShareOutcome {
            pool: self.session.port_config().pool.clone(),
            label: share.worker,
            difficulty: share.difficulty,
            accepted,
            timestamp: Utc::now(),
        });
    }

    fn build_share_event(&self, label: &str) -> ShareEvent {
        let config = self.manager.config();
        let port = self.session.port_config();

        let upstream_difficulty = self.session.difficulty();
        let difficulty = match config.recording.source_for(port.algorithm) {
            DifficultySource::Upstream => upstream_difficulty,
            DifficultySource::Nominal => port.nominal_difficulty,
        };

        let pool_data = self.manager.pool_data();
        let fallback = &config.sync.fallback_pool;
        let network_difficulty = pool_data
            .network_difficulty(&port.pool, fallback)
            .unwrap_or(difficulty);
        let block_height = pool_data.block_height(&port.pool, fallback).unwrap_or(0);

        let (miner, worker) = messages::split_label(label);

        ShareEvent {
            pool: port.pool.clone(),
            algorithm: port.algorithm,
            difficulty,
            upstream_difficulty,
            network_difficulty,
            block_height,
            miner: miner.to_string(),
            worker: worker.to_string(),
            label: label.to_string(),
            source_ip: self.session.remote_addr().ip().to_string(),
            listen_port: self.session.listen_port(),
            timestamp: Utc::now(),
        }
    }
}

/// Read a chunk, honoring the idle timeout (zero disables it).
async fn read_chunk(
    idle_timeout: Duration,
    reader: &mut OwnedReadHalf,
    buf: &mut [u8],
) -> std::result::Result<usize, DisconnectReason> {
    let read = reader.read(buf);

    let outcome = if idle_timeout.is_zero() {
        read.await
    } else {
        match tokio::time::timeout(idle_timeout, read).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(DisconnectReason::Timeout),
        }
    };

    outcome.map_err(|e| DisconnectReason::NetworkError {
        error: e.to_string(),
    })
}

async fn write_message(
    writer: &mut BufWriter<OwnedWriteHalf>,
    message: &Value,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string());
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

async fn write_raw(writer: &mut BufWriter<OwnedWriteHalf>, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}
