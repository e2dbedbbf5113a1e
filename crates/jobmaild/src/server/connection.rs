//! Connection handler for one inbound notice.
//!
//! The protocol has no framing: a peer connects, writes one JSON notice and
//! closes its side. End-of-stream is the message terminator and nothing is
//! ever written back. Each connection therefore yields at most one event.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the crate panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Every failure is logged and ends the connection without touching the queue

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use jobmail_core::JobEvent;
use jobmail_protocol::{parse_notice, ProtocolError};

use crate::queue::{QueueError, QueueHandle};

/// Per-connection resource limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    /// Time allowed from accept until the peer closes its side
    pub read_timeout: Duration,

    /// Largest accepted payload in bytes
    pub max_message_bytes: usize,
}

/// Handler for a single inbound connection.
pub struct ConnectionHandler {
    stream: TcpStream,
    peer: SocketAddr,
    queue: QueueHandle,
    limits: ConnectionLimits,
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        queue: QueueHandle,
        limits: ConnectionLimits,
        connection_number: u64,
    ) -> Self {
        Self {
            stream,
            peer,
            queue,
            limits,
            connection_number,
        }
    }

    /// Runs the handler to completion, logging the outcome.
    ///
    /// Returns the event that was queued, if any.
    pub async fn run(mut self) -> Option<JobEvent> {
        let peer = self.peer;
        let connection = self.connection_number;
        debug!(connection, peer = %peer, "Peer connected");

        match self.receive().await {
            Ok(event) => {
                info!(
                    connection,
                    peer = %peer,
                    nodename = %event.nodename(),
                    job = event.job_number(),
                    status = %event.status(),
                    "Queued job event"
                );
                Some(event)
            }
            Err(ConnectionError::Parse(ProtocolError::EmptyPayload)) => {
                debug!(connection, peer = %peer, "Peer closed without sending a notice");
                None
            }
            Err(e) => {
                warn!(
                    connection,
                    peer = %peer,
                    error = %e,
                    "Dropping connection"
                );
                None
            }
        }
    }

    /// Reads the payload, decodes it and appends it to the queue.
    async fn receive(&mut self) -> Result<JobEvent, ConnectionError> {
        let read_timeout = self.limits.read_timeout;
        let payload = match timeout(read_timeout, self.read_payload()).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout(read_timeout)),
        };

        let event = parse_notice(&payload)?;

        self.queue
            .append(event.clone())
            .await
            .map_err(ConnectionError::Queue)?;

        Ok(event)
    }

    /// Reads until the peer closes its side or the size cap is exceeded.
    async fn read_payload(&mut self) -> Result<Vec<u8>, ConnectionError> {
        let max = self.limits.max_message_bytes;
        let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);

        let mut payload = Vec::new();
        (&mut self.stream)
            .take(limit)
            .read_to_end(&mut payload)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if payload.len() > max {
            return Err(ConnectionError::MessageTooLarge { max });
        }
        Ok(payload)
    }
}

/// Errors that can occur while handling one connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Peer did not finish sending within {0:?}")]
    Timeout(Duration),

    #[error("Message too large (max: {max} bytes)")]
    MessageTooLarge { max: usize },

    #[error("Parse error: {0}")]
    Parse(#[from] ProtocolError),

    #[error("Queue error: {0}")]
    Queue(QueueError),
}
