//! Sending side of the notice protocol.
//!
//! Used by `jobmail-notify` on compute nodes: one TCP connection per notice,
//! write the JSON, close. The collector never answers.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use jobmail_protocol::RawJobNotice;

/// Default time allowed for connecting and writing one notice.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends one notice to the collector at `addr` (`host:port`).
pub async fn send_notice(
    addr: &str,
    notice: &RawJobNotice,
    send_timeout: Duration,
) -> Result<(), ClientError> {
    let json = notice
        .to_json()
        .map_err(|e| ClientError::Encode(e.to_string()))?;

    timeout(send_timeout, send_payload(addr, json.as_bytes()))
        .await
        .map_err(|_| ClientError::Timeout(send_timeout))??;

    debug!(addr, path = %notice.path, "Sent job notice");
    Ok(())
}

/// Writes a raw payload and closes the connection.
pub async fn send_payload(addr: &str, payload: &[u8]) -> Result<(), ClientError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ClientError::Connect {
            addr: addr.to_string(),
            error: e.to_string(),
        })?;

    stream
        .write_all(payload)
        .await
        .map_err(|e| ClientError::Io(e.to_string()))?;
    stream
        .shutdown()
        .await
        .map_err(|e| ClientError::Io(e.to_string()))?;
    Ok(())
}

/// Errors that can occur while sending a notice.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to connect to collector at {addr}: {error}")]
    Connect { addr: String, error: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Failed to encode notice: {0}")]
    Encode(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}
