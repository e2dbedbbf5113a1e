//! Queue actor - sole owner of the queue file.
//!
//! The QueueActor receives commands via an mpsc channel and applies them to
//! [`QueueStorage`] one at a time. Because nothing else touches the file,
//! appends from concurrent connections can never interleave with each other
//! or with a drain.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the crate panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response send failures (caller went away) are ignored

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::commands::QueueCommand;
use super::storage::QueueStorage;

/// The queue actor - owns the queue file.
///
/// # Ordering
///
/// Commands are processed in the order they arrive on the channel. An append
/// acknowledged before a drain was sent is therefore part of that drain, and
/// an append sent after it lands in the (now empty) file for the next one.
pub struct QueueActor {
    /// Command receiver
    receiver: mpsc::Receiver<QueueCommand>,

    /// The queue file
    storage: QueueStorage,
}

impl QueueActor {
    pub fn new(receiver: mpsc::Receiver<QueueCommand>, storage: QueueStorage) -> Self {
        Self { receiver, storage }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all handles dropped).
    pub async fn run(mut self) {
        info!(path = %self.storage.path().display(), "Queue actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!("Queue actor stopped");
    }

    async fn handle_command(&mut self, cmd: QueueCommand) {
        match cmd {
            QueueCommand::Append { event, respond_to } => {
                let result = self.storage.append(&event).await;
                match &result {
                    Ok(()) => debug!(
                        nodename = %event.nodename(),
                        job = event.job_number(),
                        "Appended event to queue"
                    ),
                    Err(e) => error!(error = %e, "Failed to append event to queue"),
                }
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(result);
            }
            QueueCommand::DrainAll { respond_to } => {
                let result = self.storage.drain().await;
                if let Err(e) = &result {
                    error!(error = %e, "Failed to drain queue");
                }
                let _ = respond_to.send(result);
            }
            QueueCommand::Pending { respond_to } => {
                let _ = respond_to.send(self.storage.pending().await);
            }
        }
    }
}
