//! Dispatch sink - hands rendered digests to the mail transport.
//!
//! # Delivery policy
//!
//! Dispatch is at most once per drain cycle. If the transport fails, the
//! error is returned and logged by the caller, and the events of that cycle
//! are NOT put back into the queue: the digest is lost. There is no retry.

mod transport;

pub use transport::{LogTransport, MailTransport, SendmailTransport, TransportError};

use std::sync::Arc;

use base64::prelude::*;

use thiserror::Error;
use tracing::info;

use jobmail_core::Digest;

use crate::config::{Config, TransportKind};

/// A complete message ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl OutgoingMail {
    /// Renders a plain-text RFC 5322 message.
    ///
    /// Line breaks in header values are replaced by spaces so a crafted node
    /// name or path can never inject extra headers. A non-ASCII subject is
    /// sent as RFC 2047 encoded words.
    pub fn to_rfc5322(&self) -> String {
        let mut message = String::with_capacity(self.body.len() + 256);
        push_header(&mut message, "From", &self.from);
        push_header(&mut message, "To", &self.to.join(","));
        push_header(&mut message, "Subject", &encode_header_text(&self.subject));
        push_header(&mut message, "MIME-Version", "1.0");
        push_header(&mut message, "Content-Type", "text/plain; charset=utf-8");
        push_header(&mut message, "Content-Transfer-Encoding", "8bit");
        message.push('\n');
        message.push_str(&self.body);
        if !self.body.ends_with('\n') {
            message.push('\n');
        }
        message
    }
}

fn push_header(message: &mut String, name: &str, value: &str) {
    message.push_str(name);
    message.push_str(": ");
    message.extend(value.chars().map(unfold));
    message.push('\n');
}

fn unfold(c: char) -> char {
    if c == '\r' || c == '\n' {
        ' '
    } else {
        c
    }
}

/// Raw bytes per encoded word; keeps each word within the 75 character limit.
const ENCODED_WORD_BYTES: usize = 45;

/// Encodes free header text as `=?utf-8?B?...?=` words unless it is plain ASCII.
fn encode_header_text(value: &str) -> String {
    let value: String = value.chars().map(unfold).collect();
    if value.is_ascii() {
        return value;
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in value.chars() {
        if chunk.len() + c.len_utf8() > ENCODED_WORD_BYTES {
            words.push(encoded_word(&chunk));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(encoded_word(&chunk));
    }

    // Whitespace between adjacent encoded words is dropped by readers
    words.join("\n ")
}

fn encoded_word(text: &str) -> String {
    format!("=?utf-8?B?{}?=", BASE64_STANDARD.encode(text))
}

/// Errors that can occur while dispatching a digest.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{transport} transport failed: {source}")]
    Transport {
        transport: &'static str,
        #[source]
        source: TransportError,
    },
}

/// Addresses a digest and passes it to the transport.
#[derive(Clone)]
pub struct DispatchSink {
    sender: String,
    recipients: Vec<String>,
    transport: Arc<dyn MailTransport>,
}

impl DispatchSink {
    pub fn new(
        sender: impl Into<String>,
        recipients: Vec<String>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipients,
            transport,
        }
    }

    /// Builds the sink described by the `[mail]` config section.
    pub fn from_config(config: &Config) -> Self {
        let transport: Arc<dyn MailTransport> = match config.mail.transport {
            TransportKind::Sendmail => {
                Arc::new(SendmailTransport::new(config.mail.sendmail_path.clone()))
            }
            TransportKind::Log => Arc::new(LogTransport),
        };
        Self::new(config.mail.sender.trim(), config.recipients(), transport)
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Addresses a digest without sending it.
    pub fn compose(&self, digest: &Digest) -> OutgoingMail {
        OutgoingMail {
            from: self.sender.clone(),
            to: self.recipients.clone(),
            subject: digest.subject.clone(),
            body: digest.body.clone(),
        }
    }

    /// Sends one digest.
    ///
    /// # Errors
    ///
    /// `DispatchError::Transport` if the transport did not accept the
    /// message. The caller must treat the digest as lost.
    pub async fn dispatch(&self, digest: &Digest) -> Result<(), DispatchError> {
        let mail = self.compose(digest);

        self.transport
            .send(&mail)
            .await
            .map_err(|source| DispatchError::Transport {
                transport: self.transport.name(),
                source,
            })?;

        info!(
            transport = self.transport.name(),
            events = digest.event_count,
            recipients = self.recipients.len(),
            "Digest dispatched"
        );
        Ok(())
    }
}
