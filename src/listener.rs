use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use crate::error::{Result, StratumError};
use crate::manager::Manager;
use crate::network::{Session, SessionRelay};
use crate::routing::PortConfig;

struct BoundPort {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: PortConfig,
}

/// One TCP listener per configured port. Each accepted downstream gets a
/// dedicated upstream connection chosen by the port's algorithm, and a
/// relay that lives until either side goes away.
pub struct Listener {
    bound: Vec<BoundPort>,
    manager: Arc<Manager>,
}

impl Listener {
    pub async fn bind(manager: Arc<Manager>) -> Result<Self> {
        let config = manager.config().clone();
        let mut bound = Vec::with_capacity(config.ports.len());

        for entry in &config.ports {
            let addr = SocketAddr::new(config.server.bind, entry.port);
            let listener = TcpListener::bind(addr).await.map_err(|e| {
                StratumError::Connection {
                    message: format!("failed to bind port {}: {e}", entry.port),
                    remote_addr: Some(addr),
                }
            })?;
            let local_addr = listener.local_addr()?;
            let port_config = manager.routing().resolve(entry.port).clone();

            info!(
                "listening on {} -> {} ({}, nominal diff {})",
                local_addr, port_config.pool, port_config.algorithm, port_config.nominal_difficulty,
            );

            bound.push(BoundPort {
                listener,
                local_addr,
                config: port_config,
            });
        }

        Ok(Self { bound, manager })
    }

    /// Addresses actually bound, in configuration order. Differs from the
    /// configured ports when an entry asked for port 0.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.bound.iter().map(|p| p.local_addr).collect()
    }

    /// Run every accept loop until the process is shut down.
    pub async fn accept(self) -> Result<()> {
        let mut handles = Vec::with_capacity(self.bound.len());

        for port in self.bound {
            let manager = Arc::clone(&self.manager);
            handles.push(tokio::spawn(accept_loop(port, manager)));
        }

        for handle in handles {
            handle.await.map_err(|e| StratumError::Internal {
                message: format!("accept loop panicked: {e}"),
            })?;
        }

        Ok(())
    }
}

async fn accept_loop(port: BoundPort, manager: Arc<Manager>) {
    loop {
        match port.listener.accept().await {
            Ok((downstream, addr)) => {
                manager.stats().record_connect();
                metrics::counter!("network_connected_total").increment(1);

                info!(
                    "new miner connection from {} on port {} ({}/{}) | total miners: {}",
                    addr,
                    port.local_addr.port(),
                    port.config.pool,
                    port.config.algorithm,
                    manager.stats().connected_miners(),
                );

                let manager = Arc::clone(&manager);
                let port_config = port.config.clone();
                let listen_port = port.local_addr.port();

                tokio::spawn(async move {
                    relay_connection(manager.clone(), downstream, addr, listen_port, port_config)
                        .await;

                    // Exactly one decrement per accepted connection, however
                    // the session ended (including a failed upstream dial).
                    manager.stats().record_disconnect();
                    metrics::counter!("network_disconnected_total").increment(1);
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}

async fn relay_connection(
    manager: Arc<Manager>,
    downstream: TcpStream,
    addr: SocketAddr,
    listen_port: u16,
    port_config: PortConfig,
) {
    let endpoint = manager
        .config()
        .upstream_endpoint(port_config.algorithm)
        .to_string();

    let start = Instant::now();
    let upstream = TcpStream::connect(endpoint.as_str()).await;
    let latency = start.elapsed();

    metrics::histogram!("network_pool_latency").record(latency.as_secs_f64());

    match upstream {
        Ok(upstream) => {
            info!(
                "miner {} linked to upstream {} in {:#.3?}",
                addr, endpoint, latency
            );

            let session = Arc::new(Session::new(addr, listen_port, port_config));
            let relay = SessionRelay::new(manager, session);

            if let Err(e) = relay.run(downstream, upstream).await {
                error!("miner {} - relay error: {}", addr, e);
            }
        }
        Err(e) => {
            metrics::counter!("network_connection_failed_total").increment(1);
            error!(
                "miner {} - failed to connect to upstream {}: {} in {:#.3?}",
                addr, endpoint, e, latency
            );
        }
    }
}
