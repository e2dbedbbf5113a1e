//! Integration tests for the TCP ingress listener.
//!
//! These run a real `IngressServer` on an ephemeral localhost port backed by
//! a queue in a temp directory, and talk to it the way compute nodes do.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::time::Duration;

use jobmail_core::JobStatus;
use jobmail_protocol::RawJobNotice;
use jobmaild::client::{send_notice, send_payload};
use jobmaild::config::ServerConfig;
use jobmaild::queue::{spawn_queue, QueueHandle};
use jobmaild::server::IngressServer;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for the queue to reach an expected size
const QUEUE_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between queue size checks
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Time given to the server to handle a message we expect it to drop
const SETTLE_TIME: Duration = Duration::from_millis(200);

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle and cleanup.
struct TestServer {
    addr: SocketAddr,
    queue: QueueHandle,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
    _temp_dir: TempDir, // Keep alive for RAII cleanup
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(ServerConfig::default()).await
    }

    /// Spawns a server on 127.0.0.1 with an ephemeral port.
    async fn spawn_with(config: ServerConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let queue = spawn_queue(temp_dir.path().join("jobs.jsonl"))
            .await
            .expect("open queue");

        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..config
        };
        let cancel_token = CancellationToken::new();
        let server = IngressServer::bind(&config, queue.clone(), cancel_token.clone())
            .await
            .expect("bind server");
        let addr = server.local_addr().expect("local addr");

        let task = tokio::spawn(async move {
            let _ = server.run().await;
        });

        TestServer {
            addr,
            queue,
            cancel_token,
            task,
            _temp_dir: temp_dir,
        }
    }

    fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// Waits until the queue holds `expected` events.
    async fn wait_for_pending(&self, expected: usize) {
        let start = tokio::time::Instant::now();
        loop {
            let pending = self.queue.pending().await.expect("count pending");
            if pending == expected {
                return;
            }
            assert!(
                start.elapsed() < QUEUE_WAIT_TIMEOUT,
                "queue has {pending} events, expected {expected}"
            );
            sleep(QUEUE_POLL_INTERVAL).await;
        }
    }

    /// Cancels the server and waits for it to stop.
    async fn shutdown(self) -> SocketAddr {
        self.cancel_token.cancel();
        timeout(QUEUE_WAIT_TIMEOUT, self.task)
            .await
            .expect("server stops after cancel")
            .expect("server task completes");
        self.addr
    }
}

fn notice(job: u32, node: &str, status: &str) -> RawJobNotice {
    RawJobNotice::new(
        format!("/data/proj/Refine3D/job{job:03}/RELION_JOB_EXIT_{status}"),
        node,
        "2024-03-01T10:15:00.123456",
    )
}

// ============================================================================
// Ingress Tests
// ============================================================================

#[tokio::test]
async fn test_valid_notice_is_queued() {
    let server = TestServer::spawn().await;

    send_notice(&server.addr(), &notice(12, "gpu03", "FAILURE"), SEND_TIMEOUT)
        .await
        .unwrap();
    server.wait_for_pending(1).await;

    let batch = server.queue.drain_all().await.unwrap();
    assert_eq!(batch.len(), 1);
    let event = &batch.events[0];
    assert_eq!(event.nodename(), "gpu03");
    assert_eq!(event.job_number(), 12);
    assert_eq!(event.status(), JobStatus::Failure);
    assert_eq!(event.time(), "2024-03-01T10:15:00.123456");

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_json_is_dropped_and_listener_survives() {
    let server = TestServer::spawn().await;

    send_payload(&server.addr(), b"{\"path\": \"/data/proj/job00")
        .await
        .unwrap();
    send_payload(&server.addr(), b"not json at all").await.unwrap();
    send_payload(&server.addr(), &[0xff, 0xfe, 0x00]).await.unwrap();
    sleep(SETTLE_TIME).await;
    assert_eq!(server.queue.pending().await.unwrap(), 0);

    send_notice(&server.addr(), &notice(1, "gpu01", "SUCCESS"), SEND_TIMEOUT)
        .await
        .unwrap();
    server.wait_for_pending(1).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_events_are_not_queued() {
    let server = TestServer::spawn().await;

    let bad = [
        // Not an exit marker
        RawJobNotice::new("/data/proj/job001/run.out", "gpu01", "t"),
        // Unknown status
        RawJobNotice::new("/data/proj/job001/RELION_JOB_EXIT_PAUSED", "gpu01", "t"),
        // Job directory not jobNNN
        RawJobNotice::new("/data/proj/job12/RELION_JOB_EXIT_SUCCESS", "gpu01", "t"),
        // Missing node name
        RawJobNotice::new("/data/proj/job001/RELION_JOB_EXIT_SUCCESS", "", "t"),
    ];
    for notice in &bad {
        send_notice(&server.addr(), notice, SEND_TIMEOUT).await.unwrap();
    }
    // Missing field entirely
    send_payload(&server.addr(), br#"{"path": "/data/proj/job001/RELION_JOB_EXIT_SUCCESS"}"#)
        .await
        .unwrap();

    sleep(SETTLE_TIME).await;
    assert_eq!(server.queue.pending().await.unwrap(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_connection_without_payload_is_ignored() {
    let server = TestServer::spawn().await;

    send_payload(&server.addr(), b"").await.unwrap();
    send_payload(&server.addr(), b"  \n").await.unwrap();
    sleep(SETTLE_TIME).await;
    assert_eq!(server.queue.pending().await.unwrap(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_payload_is_rejected() {
    let server = TestServer::spawn_with(ServerConfig {
        max_message_bytes: 256,
        ..ServerConfig::default()
    })
    .await;

    let huge = RawJobNotice::new(
        format!("/data/{}/job001/RELION_JOB_EXIT_SUCCESS", "x".repeat(1024)),
        "gpu01",
        "t",
    );
    // The server may reset the connection mid-write; either way nothing is queued
    let _ = send_notice(&server.addr(), &huge, SEND_TIMEOUT).await;
    sleep(SETTLE_TIME).await;
    assert_eq!(server.queue.pending().await.unwrap(), 0);

    send_notice(&server.addr(), &notice(2, "gpu01", "SUCCESS"), SEND_TIMEOUT)
        .await
        .unwrap();
    server.wait_for_pending(1).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_stalled_peer_does_not_block_others() {
    let server = TestServer::spawn_with(ServerConfig {
        read_timeout_secs: 1,
        ..ServerConfig::default()
    })
    .await;

    // Connects and never sends or closes
    let mut stalled = TcpStream::connect(server.addr).await.unwrap();

    send_notice(&server.addr(), &notice(3, "gpu02", "ABORTED"), SEND_TIMEOUT)
        .await
        .unwrap();
    server.wait_for_pending(1).await;

    // The server gives up on the stalled peer after its read timeout
    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(5), stalled.read(&mut buf))
        .await
        .expect("server closes stalled connection");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert_eq!(server.queue.pending().await.unwrap(), 1);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_senders() {
    let server = TestServer::spawn().await;
    let addr = server.addr();

    let mut senders = Vec::new();
    for job in 0..50u32 {
        let addr = addr.clone();
        senders.push(tokio::spawn(async move {
            let node = format!("gpu{:02}", job % 5);
            send_notice(&addr, &notice(job, &node, "SUCCESS"), SEND_TIMEOUT).await
        }));
    }
    for sender in senders {
        sender.await.unwrap().unwrap();
    }

    server.wait_for_pending(50).await;
    let batch = server.queue.drain_all().await.unwrap();
    assert_eq!(batch.len(), 50);
    assert_eq!(batch.skipped, 0);

    server.shutdown().await;
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let server = TestServer::spawn().await;
    let addr = server.shutdown().await;

    let result = TcpStream::connect(addr).await;
    assert!(result.is_err(), "listener should be closed after shutdown");
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_read_finish() {
    let server = TestServer::spawn().await;

    let json = notice(21, "gpu04", "SUCCESS").to_json().unwrap();
    let (head, tail) = json.as_bytes().split_at(json.len() / 2);

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(head).await.unwrap();
    // Let the server accept and start reading before shutdown begins
    sleep(SETTLE_TIME).await;

    server.cancel_token.cancel();
    sleep(SETTLE_TIME).await;

    stream.write_all(tail).await.unwrap();
    stream.shutdown().await.unwrap();

    // Check before shutdown(), which drops the temp dir holding the queue
    server.wait_for_pending(1).await;
    let batch = server.queue.drain_all().await.unwrap();
    assert_eq!(batch.events[0].job_number(), 21);
    assert_eq!(batch.events[0].nodename(), "gpu04");

    server.shutdown().await;
}

#[tokio::test]
async fn test_bind_conflict_is_reported() {
    let server = TestServer::spawn().await;
    let queue = server.queue.clone();

    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: server.addr.port(),
        ..ServerConfig::default()
    };
    let result = IngressServer::bind(&config, queue, CancellationToken::new()).await;
    assert!(result.is_err());

    server.shutdown().await;
}
