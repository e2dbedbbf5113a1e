//! Interval scheduler for drain cycles.
//!
//! Every `interval` the scheduler runs one drain cycle:
//!
//! ```text
//! QueueHandle::drain_all ──▶ DigestBuilder::build ──▶ DispatchSink::dispatch
//! ```
//!
//! Cycles never overlap: the next tick is only awaited once the current
//! cycle has finished, and missed ticks are delayed rather than bunched.
//! Each cycle runs in its own task so that even a panic inside it is
//! contained; it is logged and the scheduler carries on with the next tick.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the crate panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Cycle failures are logged, never propagated

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use jobmail_core::DigestBuilder;

use crate::dispatch::{DispatchError, DispatchSink};
use crate::queue::{QueueError, QueueHandle};

/// What one drain cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The queue was empty; nothing was sent
    Empty { skipped: usize },

    /// A digest was handed to the transport
    Dispatched { events: usize, skipped: usize },
}

/// Errors that end a drain cycle early.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Failed to drain queue: {0}")]
    Queue(#[from] QueueError),

    /// The batch was drained but could not be sent; those events are gone.
    #[error("Digest of {lost} events lost: {source}")]
    Dispatch {
        lost: usize,
        #[source]
        source: DispatchError,
    },
}

/// One drain, build, dispatch pass.
#[derive(Clone)]
pub struct DrainCycle {
    queue: QueueHandle,
    builder: Arc<DigestBuilder>,
    sink: Arc<DispatchSink>,
}

impl DrainCycle {
    pub fn new(queue: QueueHandle, builder: DigestBuilder, sink: DispatchSink) -> Self {
        Self {
            queue,
            builder: Arc::new(builder),
            sink: Arc::new(sink),
        }
    }

    /// Runs one cycle.
    ///
    /// Drained events are consumed whether or not dispatch succeeds.
    pub async fn run(&self) -> Result<CycleOutcome, CycleError> {
        let batch = self.queue.drain_all().await?;
        let skipped = batch.skipped;

        if skipped > 0 {
            warn!(skipped, "Dropped malformed queue entries during drain");
        }

        let digest = match self.builder.build(&batch.events) {
            Some(digest) => digest,
            None => {
                info!("No finished jobs, skipping digest");
                return Ok(CycleOutcome::Empty { skipped });
            }
        };

        self.sink
            .dispatch(&digest)
            .await
            .map_err(|source| CycleError::Dispatch {
                lost: digest.event_count,
                source,
            })?;

        Ok(CycleOutcome::Dispatched {
            events: digest.event_count,
            skipped,
        })
    }
}

/// Runs [`DrainCycle`]s on a fixed period until cancelled.
pub struct DigestScheduler {
    cycle: DrainCycle,
    period: Duration,
    cancel_token: CancellationToken,
}

impl DigestScheduler {
    pub fn new(cycle: DrainCycle, period: Duration, cancel_token: CancellationToken) -> Self {
        Self {
            cycle,
            period,
            cancel_token,
        }
    }

    /// Runs the scheduler loop.
    ///
    /// The first cycle fires one period after start. Returns when the
    /// cancellation token is triggered; a cycle already running is allowed
    /// to finish first.
    pub async fn run(self) {
        info!(
            interval_secs = self.period.as_secs_f64(),
            "Digest scheduler started"
        );

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Digest scheduler shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    self.run_cycle_isolated().await;
                }
            }
        }

        info!("Digest scheduler stopped");
    }

    /// Runs one cycle in its own task and logs the outcome.
    async fn run_cycle_isolated(&self) {
        debug!("Starting drain cycle");
        let cycle = self.cycle.clone();

        match tokio::spawn(async move { cycle.run().await }).await {
            Ok(Ok(outcome)) => debug!(?outcome, "Drain cycle complete"),
            Ok(Err(e @ CycleError::Dispatch { .. })) => {
                error!(error = %e, "Digest dispatch failed; events of this cycle are not re-queued");
            }
            Ok(Err(e)) => error!(error = %e, "Drain cycle failed"),
            Err(e) => error!(error = %e, "Drain cycle panicked"),
        }
    }
}

/// Spawns the scheduler as a background task.
pub fn spawn_scheduler(
    cycle: DrainCycle,
    period: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(DigestScheduler::new(cycle, period, cancel_token).run())
}
