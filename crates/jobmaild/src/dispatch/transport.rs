//! Mail transports.
//!
//! The daemon does not speak SMTP itself. A [`MailTransport`] takes a fully
//! formed message and either hands it to the local MTA through `sendmail`
//! or just logs it.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use super::OutgoingMail;

/// Upper bound on one `sendmail` invocation.
const SENDMAIL_TIMEOUT: Duration = Duration::from_secs(60);

/// Something that can deliver an [`OutgoingMail`].
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Attempts delivery. Returning `Ok` means the transport accepted the
    /// message, not that it reached every recipient.
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError>;
}

/// Errors reported by a mail transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to start {program}: {error}")]
    Spawn { program: PathBuf, error: String },

    #[error("I/O error talking to mail transport: {0}")]
    Io(String),

    #[error("Mail transport rejected message ({status}): {stderr}")]
    Rejected { status: String, stderr: String },

    #[error("Mail transport timed out after {0:?}")]
    Timeout(Duration),
}

// ============================================================================
// Log Transport
// ============================================================================

/// Logs the digest instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        info!(
            from = %mail.from,
            to = %mail.to.join(","),
            subject = %mail.subject,
            "Digest (not sent):\n{}",
            mail.body
        );
        Ok(())
    }
}

// ============================================================================
// Sendmail Transport
// ============================================================================

/// Pipes the message to `sendmail -t -i`.
///
/// Recipients are taken from the message headers (`-t`); relay host and
/// credentials are the local MTA's configuration.
#[derive(Debug, Clone)]
pub struct SendmailTransport {
    program: PathBuf,
}

impl SendmailTransport {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Runs `sendmail -i [-f sender] -t`, feeding the message on stdin.
    async fn deliver(&self, sender: &str, message: &[u8]) -> Result<(), TransportError> {
        let mut command = Command::new(&self.program);
        command.arg("-i");
        if !sender.is_empty() {
            // Envelope sender
            command.arg("-f").arg(sender);
        }
        let mut child = command
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn {
                program: self.program.clone(),
                error: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let written = async {
                stdin.write_all(message).await?;
                stdin.shutdown().await
            }
            .await;

            // A transport that exits without reading is judged by its exit status
            match written {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    debug!(program = %self.program.display(), "Transport closed stdin early");
                }
                Err(e) => return Err(TransportError::Io(e.to_string())),
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(TransportError::Rejected {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl MailTransport for SendmailTransport {
    fn name(&self) -> &'static str {
        "sendmail"
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        let message = mail.to_rfc5322();
        debug!(
            program = %self.program.display(),
            bytes = message.len(),
            "Piping digest to sendmail"
        );

        match timeout(SENDMAIL_TIMEOUT, self.deliver(&mail.from, message.as_bytes())).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(SENDMAIL_TIMEOUT)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail() -> OutgoingMail {
        OutgoingMail {
            from: "relion@example.org".to_string(),
            to: vec!["a@example.org".to_string()],
            subject: "[relion-emailer] 1 jobs finished".to_string(),
            body: "gpu01:\n1: SUCCESS: /p/job001\n".to_string(),
        }
    }

    #[tokio::test]
    async fn test_log_transport_always_succeeds() {
        assert!(LogTransport.send(&mail()).await.is_ok());
        assert_eq!(LogTransport.name(), "log");
    }

    #[tokio::test]
    async fn test_sendmail_missing_program_is_spawn_error() {
        let transport = SendmailTransport::new("/nonexistent/sendmail");
        let err = transport.send(&mail()).await.unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sendmail_nonzero_exit_is_rejection() {
        let transport = SendmailTransport::new("false");
        let err = transport.send(&mail()).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected { .. }), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sendmail_gets_envelope_sender_and_message() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let args_file = dir.path().join("args");
        let message_file = dir.path().join("message");
        let script = dir.path().join("sendmail");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$@\" > '{}'\ncat > '{}'\n",
                args_file.display(),
                message_file.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        // Another test forking at the same moment can briefly hold the
        // script open for writing (ETXTBSY)
        let transport = SendmailTransport::new(&script);
        let mut result = transport.send(&mail()).await;
        for _ in 0..10 {
            if !matches!(result, Err(TransportError::Spawn { .. })) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            result = transport.send(&mail()).await;
        }
        result.unwrap();

        let args = std::fs::read_to_string(&args_file).unwrap();
        assert_eq!(args.trim(), "-i -f relion@example.org -t");
        let message = std::fs::read_to_string(&message_file).unwrap();
        assert_eq!(message, mail().to_rfc5322());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sendmail_success() {
        let transport = SendmailTransport::new("true");
        assert!(transport.send(&mail()).await.is_ok());
    }
}
