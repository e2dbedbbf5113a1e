//! TCP ingress listener for the collector daemon.
//!
//! The server:
//! - Listens on a TCP socket for origin nodes
//! - Spawns a ConnectionHandler task for each connection
//! - Appends each decoded event to the durable queue
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  IngressServer  │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│   QueueHandle   │
//! │   (per peer)    │     │                 │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! Connections run as independent tasks, so a slow peer only holds its own
//! task, and only until its read timeout.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the crate panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Accept errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, ConnectionLimits};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::queue::QueueHandle;

/// Pause after a failed accept, so that e.g. fd exhaustion does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// TCP server receiving job notices.
pub struct IngressServer {
    /// Bound listener
    listener: TcpListener,

    /// Handle to the durable queue
    queue: QueueHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for log correlation
    connection_counter: AtomicU64,

    /// Limits applied to every connection
    limits: ConnectionLimits,
}

impl IngressServer {
    /// Binds the listener described by `config`.
    ///
    /// Binding happens here rather than in [`run`](Self::run) so that the
    /// caller learns about address problems immediately and can read the
    /// actual port when binding port 0.
    pub async fn bind(
        config: &ServerConfig,
        queue: QueueHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.clone(),
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            queue,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            limits: ConnectionLimits {
                read_timeout: config.read_timeout(),
                max_message_bytes: config.max_message_bytes,
            },
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Bind {
                addr: "listener".to_string(),
                error: e.to_string(),
            })
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered, then
    /// stops accepting and waits up to one read timeout for in-flight
    /// connections before aborting them.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self {
            listener,
            queue,
            cancel_token,
            connection_counter,
            limits,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "Ingress listener accepting connections");
        }

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = connection_counter.fetch_add(1, Ordering::Relaxed);
                            let handler = ConnectionHandler::new(
                                stream,
                                peer,
                                queue.clone(),
                                limits,
                                conn_num,
                            );
                            connections.spawn(handler.run());
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }

                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!(error = %e, "Connection handler panicked");
                        }
                    }
                }
            }
        }

        // Stop accepting before waiting on stragglers
        drop(listener);
        finish_connections(connections, limits.read_timeout).await;

        info!("Ingress listener stopped");
        Ok(())
    }
}

/// Waits for in-flight connections, aborting any still running after `grace`.
async fn finish_connections<T: 'static>(mut connections: JoinSet<T>, grace: Duration) {
    if connections.is_empty() {
        return;
    }

    debug!(in_flight = connections.len(), "Waiting for in-flight connections");

    let drained = timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = connections.len(),
            "In-flight connections did not finish, aborting"
        );
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },
}
