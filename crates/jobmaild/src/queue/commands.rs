//! Queue actor commands, errors, and results.
//!
//! This module defines the message types for communicating with the `QueueActor`:
//! - `QueueCommand`: Commands sent to the actor
//! - `QueueError`: Errors that can occur during queue operations
//! - `DrainedBatch`: What one drain hands to the digest cycle

use std::path::PathBuf;

use jobmail_core::JobEvent;
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// Queue Commands
// ============================================================================

/// Commands sent to the queue actor.
///
/// The actor handles one command at a time, which is what makes each append
/// and each drain a single indivisible operation on the queue file.
#[derive(Debug)]
pub enum QueueCommand {
    /// Durably append one event to the tail of the queue.
    Append {
        event: JobEvent,
        respond_to: oneshot::Sender<Result<(), QueueError>>,
    },

    /// Read every pending event and clear the queue.
    DrainAll {
        respond_to: oneshot::Sender<Result<DrainedBatch, QueueError>>,
    },

    /// Count pending lines without draining them.
    Pending {
        respond_to: oneshot::Sender<Result<usize, QueueError>>,
    },
}

// ============================================================================
// Drain Result
// ============================================================================

/// Result of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainedBatch {
    /// Parsed events in file order
    pub events: Vec<JobEvent>,

    /// Lines that failed to parse and were dropped
    pub skipped: usize,
}

impl DrainedBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

// ============================================================================
// Queue Errors
// ============================================================================

/// Errors that can occur during queue operations.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// The queue file could not be read or written
    #[error("Queue file {path}: {operation} failed: {error}")]
    Io {
        path: PathBuf,
        operation: &'static str,
        error: String,
    },

    /// The event could not be encoded
    #[error("Failed to encode event: {0}")]
    Encode(String),

    /// The actor has shut down
    #[error("Queue actor channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = QueueError::Io {
            path: PathBuf::from("/var/lib/jobs.jsonl"),
            operation: "append",
            error: "disk full".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("/var/lib/jobs.jsonl"));
        assert!(text.contains("append"));
        assert!(text.contains("disk full"));
    }

    #[test]
    fn test_empty_batch() {
        let batch = DrainedBatch::default();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
        assert_eq!(batch.skipped, 0);
    }
}
