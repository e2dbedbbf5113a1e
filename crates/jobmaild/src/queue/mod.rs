//! Durable event queue using Actor pattern.
//!
//! The queue is the single source of truth for events that have not been
//! reported yet. A single actor task owns the queue file; everything else
//! talks to it through a [`QueueHandle`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ConnectionHandler │──┐ Append
//! │  (per peer)      │  │
//! └──────────────────┘  │   ┌─────────────┐     ┌──────────────┐
//!          ...          ├──▶│ QueueActor  │────▶│  jobs.jsonl  │
//! ┌──────────────────┐  │   └─────────────┘     └──────────────┘
//! │ DigestScheduler  │──┘ DrainAll
//! └──────────────────┘
//!     QueueCommand (mpsc channel, processed one at a time)
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::path::PathBuf;

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;
mod storage;

pub use actor::QueueActor;
pub use commands::{DrainedBatch, QueueCommand, QueueError};
pub use handle::QueueHandle;
pub use storage::QueueStorage;

/// Command channel buffer size
const COMMAND_BUFFER: usize = 256;

/// Open the queue file and spawn the actor that owns it.
///
/// Any events left in the file by a previous run stay queued and are part
/// of the next drain.
///
/// # Errors
///
/// Returns `QueueError::Io` if the file (or its directory) cannot be
/// created or repaired.
///
/// # Example
///
/// ```no_run
/// use jobmaild::queue::spawn_queue;
///
/// #[tokio::main]
/// async fn main() {
///     let queue = spawn_queue("/var/lib/relion-jobmail/jobs.jsonl").await.unwrap();
///     let batch = queue.drain_all().await.unwrap();
///     println!("{} events", batch.len());
/// }
/// ```
pub async fn spawn_queue(path: impl Into<PathBuf>) -> Result<QueueHandle, QueueError> {
    let storage = QueueStorage::open(path).await?;

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let actor = QueueActor::new(cmd_rx, storage);
    tokio::spawn(actor.run());

    Ok(QueueHandle::new(cmd_tx))
}
