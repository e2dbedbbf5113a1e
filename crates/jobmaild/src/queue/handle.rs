//! Client interface for interacting with the QueueActor.
//!
//! The `QueueHandle` provides a cheap-to-clone interface for sending commands
//! to the queue actor from connection handlers and the digest scheduler.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the crate panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `QueueError::ChannelClosed`

use tokio::sync::{mpsc, oneshot};

use jobmail_core::JobEvent;

use super::commands::{DrainedBatch, QueueCommand, QueueError};

/// Handle for interacting with the queue actor.
///
/// All methods wait for the actor's reply, so a returned `Ok` means the
/// operation has completed on disk.
#[derive(Clone)]
pub struct QueueHandle {
    sender: mpsc::Sender<QueueCommand>,
}

impl QueueHandle {
    pub fn new(sender: mpsc::Sender<QueueCommand>) -> Self {
        Self { sender }
    }

    /// Durably append one event.
    ///
    /// # Errors
    ///
    /// - `QueueError::Io` if the queue file could not be written or synced
    /// - `QueueError::ChannelClosed` if the actor has shut down
    pub async fn append(&self, event: JobEvent) -> Result<(), QueueError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(QueueCommand::Append {
                event,
                respond_to: tx,
            })
            .await
            .map_err(|_| QueueError::ChannelClosed)?;

        rx.await.map_err(|_| QueueError::ChannelClosed)?
    }

    /// Atomically read and clear every pending event.
    ///
    /// Returns an empty batch when nothing is pending.
    ///
    /// # Errors
    ///
    /// - `QueueError::Io` if the file could not be read or truncated; the
    ///   events then remain queued
    /// - `QueueError::ChannelClosed` if the actor has shut down
    pub async fn drain_all(&self) -> Result<DrainedBatch, QueueError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(QueueCommand::DrainAll { respond_to: tx })
            .await
            .map_err(|_| QueueError::ChannelClosed)?;

        rx.await.map_err(|_| QueueError::ChannelClosed)?
    }

    /// Number of records currently persisted and not yet drained.
    pub async fn pending(&self) -> Result<usize, QueueError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(QueueCommand::Pending { respond_to: tx })
            .await
            .map_err(|_| QueueError::ChannelClosed)?;

        rx.await.map_err(|_| QueueError::ChannelClosed)?
    }
}
