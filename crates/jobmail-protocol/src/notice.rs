//! Job notice wire format.
//!
//! A notice is a UTF-8 JSON object with the string fields `path`,
//! `nodename` and `time`. The same object is used in two places:
//! - over TCP, one notice per connection, terminated by the sender closing
//!   the stream
//! - in the queue file, one notice per line
//!
//! Decoding is schema-validated: a notice only becomes a [`JobEvent`] once
//! the marker path has been checked.

use jobmail_core::{DomainError, JobEvent};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw notice as it appears on the wire.
///
/// Unknown fields are ignored so that older emitters which also sent a
/// `status` field are still accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawJobNotice {
    pub path: String,
    pub nodename: String,
    pub time: String,
}

impl RawJobNotice {
    pub fn new(
        path: impl Into<String>,
        nodename: impl Into<String>,
        time: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            nodename: nodename.into(),
            time: time.into(),
        }
    }

    /// Validates the notice and converts it into a domain event.
    pub fn into_event(self) -> Result<JobEvent, ProtocolError> {
        Ok(JobEvent::new(self.path, self.nodename, self.time)?)
    }

    /// Serializes the notice as a single JSON line without the trailing newline.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

impl From<&JobEvent> for RawJobNotice {
    fn from(event: &JobEvent) -> Self {
        Self::new(event.path(), event.nodename(), event.time())
    }
}

/// Decodes one notice payload into a validated event.
///
/// Surrounding whitespace (such as a trailing newline) is ignored.
///
/// # Errors
///
/// - `ProtocolError::EmptyPayload` if the payload is empty or whitespace
/// - `ProtocolError::InvalidUtf8` if the payload is not UTF-8
/// - `ProtocolError::InvalidJson` if the payload is not a notice object
/// - `ProtocolError::InvalidEvent` if the marker path is malformed
pub fn parse_notice(payload: &[u8]) -> Result<JobEvent, ProtocolError> {
    let text = std::str::from_utf8(payload).map_err(|e| ProtocolError::InvalidUtf8(e.to_string()))?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ProtocolError::EmptyPayload);
    }

    let raw: RawJobNotice =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    raw.into_event()
}

/// Encodes an event as one queue-file line, including the trailing newline.
///
/// JSON string escaping guarantees the line contains no other newline.
pub fn encode_line(event: &JobEvent) -> Result<String, ProtocolError> {
    let mut line = RawJobNotice::from(event).to_json()?;
    line.push('\n');
    Ok(line)
}

/// Errors that can occur when decoding or encoding notices.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Empty payload")]
    EmptyPayload,

    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("Payload is not a valid job notice: {0}")]
    InvalidJson(String),

    #[error("Malformed job event: {0}")]
    InvalidEvent(#[from] DomainError),

    #[error("Failed to encode job notice: {0}")]
    Encode(String),
}
