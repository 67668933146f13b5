//! End-to-end relay tests against a scripted in-process upstream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use stratum_bridge::error::Result;
use stratum_bridge::routing::{Algorithm, PortEntry};
use stratum_bridge::services::sink::{ShareEvent, ShareOutcome, ShareRecorder, ShareSink};
use stratum_bridge::{Config, Listener, Manager};

/// Scripted upstream: records every line the relay forwards, and writes
/// whatever bytes the test injects.
struct MockUpstream {
    addr: SocketAddr,
    lines: mpsc::UnboundedReceiver<String>,
    inject: mpsc::UnboundedSender<Vec<u8>>,
}

impl MockUpstream {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (line_tx, lines) = mpsc::unbounded_channel();
        let (inject, mut inject_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut reader = BufReader::new(read).lines();

            loop {
                tokio::select! {
                    line = reader.next_line() => match line {
                        Ok(Some(line)) => {
                            let _ = line_tx.send(line);
                        }
                        _ => break,
                    },
                    bytes = inject_rx.recv() => match bytes {
                        Some(bytes) => {
                            if write.write_all(&bytes).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Self {
            addr,
            lines,
            inject,
        }
    }

    async fn recv_json(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.recv())
            .await
            .expect("timed out waiting for upstream line")
            .expect("upstream closed");
        serde_json::from_str(&line).expect("relay forwarded invalid JSON")
    }

    async fn recv_raw(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.lines.recv())
            .await
            .expect("timed out waiting for upstream line")
            .expect("upstream closed")
    }

    fn inject(&self, bytes: &[u8]) {
        self.inject.send(bytes.to_vec()).unwrap();
    }
}

#[derive(Default)]
struct RecordingSink {
    submitted: Mutex<Vec<ShareEvent>>,
    resolved: Mutex<Vec<ShareOutcome>>,
}

#[async_trait]
impl ShareSink for RecordingSink {
    async fn submit_share(&self, event: &ShareEvent) -> Result<()> {
        self.submitted.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn resolve_share(&self, outcome: &ShareOutcome) -> Result<()> {
        self.resolved.lock().unwrap().push(outcome.clone());
        Ok(())
    }
}

async fn start_relay(
    upstream_addr: SocketAddr,
    sink: Arc<dyn ShareSink>,
) -> (SocketAddr, Arc<Manager>) {
    let mut config = Config::default();
    config.server.bind = "127.0.0.1".parse().unwrap();
    config.server.idle_timeout = Duration::ZERO;
    config.upstream.sha256 = upstream_addr.to_string();
    config.upstream.username = "account".to_string();
    config.upstream.password = "secret".to_string();
    config.ports = vec![PortEntry {
        port: 0,
        pool: "btc".to_string(),
        algorithm: Algorithm::Sha256,
        difficulty: 1000.0,
    }];

    let (recorder, _writer) = ShareRecorder::spawn(sink, 64);
    let manager = Arc::new(Manager::new(Arc::new(config), recorder));

    let listener = Listener::bind(manager.clone()).await.unwrap();
    let addr = listener.local_addrs()[0];
    tokio::spawn(listener.accept());

    (addr, manager)
}

async fn connect(addr: SocketAddr) -> (BufReader<OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, write) = stream.into_split();
    (BufReader::new(read), write)
}

async fn client_line(reader: &mut BufReader<OwnedReadHalf>) -> String {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for downstream line")
        .unwrap();
    line
}

async fn wait_until(mut check: impl FnMut() -> bool, what: &str) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition never became true: {what}");
}

#[tokio::test]
async fn authorize_is_rewritten_to_the_upstream_account() {
    let mut upstream = MockUpstream::spawn().await;
    let (addr, _manager) = start_relay(upstream.addr, Arc::new(RecordingSink::default())).await;
    let (_reader, mut writer) = connect(addr).await;

    writer
        .write_all(b"{\"id\":1,\"method\":\"mining.authorize\",\"params\":[\"alice.rig1\",\"x\"]}\n")
        .await
        .unwrap();

    let forwarded = upstream.recv_json().await;
    assert_eq!(forwarded["id"], json!(1));
    assert_eq!(forwarded["method"], json!("mining.authorize"));
    assert_eq!(forwarded["params"], json!(["account", "secret"]));
}

#[tokio::test]
async fn submit_is_rewritten_and_resolution_is_counted_once() {
    let mut upstream = MockUpstream::spawn().await;
    let sink = Arc::new(RecordingSink::default());
    let (addr, manager) = start_relay(upstream.addr, sink.clone()).await;
    let (mut reader, mut writer) = connect(addr).await;

    writer
        .write_all(b"{\"id\":1,\"method\":\"mining.authorize\",\"params\":[\"alice.rig1\",\"x\"]}\n")
        .await
        .unwrap();
    upstream.recv_json().await;

    writer
        .write_all(
            b"{\"id\":7,\"method\":\"mining.submit\",\"params\":[\"alice.rig1\",\"job42\",\"00\",\"abc\",\"def\"]}\n",
        )
        .await
        .unwrap();

    let forwarded = upstream.recv_json().await;
    assert_eq!(forwarded["params"][0], json!("account"));
    assert_eq!(forwarded["params"][1], json!("job42"));
    assert_eq!(manager.stats().snapshot().shares_submitted, 1);

    // The response reaches the miner byte-for-byte and resolves the share.
    upstream.inject(b"{\"id\":7,\"result\":true,\"error\":null}\n");
    let response = client_line(&mut reader).await;
    assert_eq!(response, "{\"id\":7,\"result\":true,\"error\":null}\n");

    wait_until(
        || manager.stats().snapshot().shares_accepted == 1,
        "share accepted",
    )
    .await;

    // A duplicate response for the same id changes nothing.
    upstream.inject(b"{\"id\":7,\"result\":true,\"error\":null}\n");
    client_line(&mut reader).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = manager.stats().snapshot();
    assert_eq!(snapshot.shares_accepted, 1);
    assert_eq!(snapshot.shares_rejected, 0);

    wait_until(
        || {
            sink.submitted.lock().unwrap().len() == 1 && sink.resolved.lock().unwrap().len() == 1
        },
        "sink received exactly one submission and one resolution",
    )
    .await;

    let event = sink.submitted.lock().unwrap()[0].clone();
    assert_eq!(event.pool, "btc");
    assert_eq!(event.miner, "alice");
    assert_eq!(event.worker, "rig1");
    assert_eq!(event.label, "alice.rig1");

    let outcome = sink.resolved.lock().unwrap()[0].clone();
    assert!(outcome.accepted);
    assert_eq!(outcome.label, "alice.rig1");
}

#[tokio::test]
async fn rejected_share_counts_as_rejected() {
    let mut upstream = MockUpstream::spawn().await;
    let (addr, manager) = start_relay(upstream.addr, Arc::new(RecordingSink::default())).await;
    let (mut reader, mut writer) = connect(addr).await;

    writer
        .write_all(
            b"{\"id\":3,\"method\":\"mining.submit\",\"params\":[\"bob\",\"job\",\"00\",\"abc\",\"def\"]}\n",
        )
        .await
        .unwrap();
    upstream.recv_json().await;

    // result false (or an error) is a rejection, never an accept.
    upstream.inject(b"{\"id\":3,\"result\":false,\"error\":[21,\"stale\",null]}\n");
    client_line(&mut reader).await;

    wait_until(
        || manager.stats().snapshot().shares_rejected == 1,
        "share rejected",
    )
    .await;
    assert_eq!(manager.stats().snapshot().shares_accepted, 0);
}

#[tokio::test]
async fn split_delivery_is_reassembled_into_one_message() {
    let mut upstream = MockUpstream::spawn().await;
    let (addr, _manager) = start_relay(upstream.addr, Arc::new(RecordingSink::default())).await;
    let (_reader, mut writer) = connect(addr).await;

    let line = b"{\"id\":9,\"method\":\"mining.submit\",\"params\":[\"carol\",\"j\",\"0\",\"a\",\"b\"]}\n";
    let (head, tail) = line.split_at(25);

    writer.write_all(head).await.unwrap();
    writer.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    writer.write_all(tail).await.unwrap();

    let forwarded = upstream.recv_json().await;
    assert_eq!(forwarded["id"], json!(9));
    assert_eq!(forwarded["params"][0], json!("account"));
}

#[tokio::test]
async fn malformed_lines_pass_through_and_the_session_survives() {
    let mut upstream = MockUpstream::spawn().await;
    let (addr, _manager) = start_relay(upstream.addr, Arc::new(RecordingSink::default())).await;
    let (_reader, mut writer) = connect(addr).await;

    writer.write_all(b"this is not json\n").await.unwrap();
    assert_eq!(upstream.recv_raw().await, "this is not json");

    // Still relaying: a well-formed message after the garbage gets the
    // normal rewrite treatment.
    writer
        .write_all(b"{\"id\":2,\"method\":\"mining.authorize\",\"params\":[\"dave\",\"x\"]}\n")
        .await
        .unwrap();
    let forwarded = upstream.recv_json().await;
    assert_eq!(forwarded["params"], json!(["account", "secret"]));
}

#[tokio::test]
async fn upstream_difficulty_updates_are_reflected_in_share_events() {
    let mut upstream = MockUpstream::spawn().await;
    let sink = Arc::new(RecordingSink::default());
    let (addr, _manager) = start_relay(upstream.addr, sink.clone()).await;
    let (mut reader, mut writer) = connect(addr).await;

    writer
        .write_all(b"{\"id\":1,\"method\":\"mining.authorize\",\"params\":[\"erin.r1\",\"x\"]}\n")
        .await
        .unwrap();
    upstream.recv_json().await;

    upstream.inject(b"{\"id\":null,\"method\":\"mining.set_difficulty\",\"params\":[2048]}\n");
    client_line(&mut reader).await;
    // The forward lands before the bookkeeping pass; give the session state
    // a moment to catch up before submitting against it.
    tokio::time::sleep(Duration::from_millis(50)).await;

    writer
        .write_all(
            b"{\"id\":4,\"method\":\"mining.submit\",\"params\":[\"erin.r1\",\"j\",\"0\",\"a\",\"b\"]}\n",
        )
        .await
        .unwrap();
    upstream.recv_json().await;

    wait_until(
        || !sink.submitted.lock().unwrap().is_empty(),
        "share event recorded",
    )
    .await;

    let event = sink.submitted.lock().unwrap()[0].clone();
    assert_eq!(event.upstream_difficulty, 2048.0);
    // SHA256 records the upstream value by default.
    assert_eq!(event.difficulty, 2048.0);
    assert_eq!(event.block_height, 0);
}

#[tokio::test]
async fn miner_count_rises_and_falls_with_the_connection() {
    let mut upstream = MockUpstream::spawn().await;
    let (addr, manager) = start_relay(upstream.addr, Arc::new(RecordingSink::default())).await;

    let (_reader, mut writer) = connect(addr).await;
    writer
        .write_all(b"{\"id\":1,\"method\":\"mining.subscribe\",\"params\":[]}\n")
        .await
        .unwrap();
    upstream.recv_json().await;

    assert_eq!(manager.stats().snapshot().connected_miners, 1);

    drop(writer);
    drop(_reader);

    wait_until(
        || manager.stats().snapshot().connected_miners == 0,
        "miner count back to zero",
    )
    .await;
}

#[tokio::test]
async fn upstream_bytes_are_forwarded_verbatim_even_when_unparsable() {
    let mut upstream = MockUpstream::spawn().await;
    let (addr, _manager) = start_relay(upstream.addr, Arc::new(RecordingSink::default())).await;
    let (mut reader, mut writer) = connect(addr).await;

    writer
        .write_all(b"{\"id\":1,\"method\":\"mining.subscribe\",\"params\":[]}\n")
        .await
        .unwrap();
    upstream.recv_json().await;

    upstream.inject(b"garbage that is not json\n");
    assert_eq!(client_line(&mut reader).await, "garbage that is not json\n");
}
