//! Background worker that finishes interrupted order deletions.
//!
//! Every pass replays the compensations that are not completed, returning
//! whatever stock they still owe. Passes run on a fixed interval until the
//! shutdown future resolves; a pass in progress is allowed to finish.

pub mod config;
pub mod error;

use std::future::Future;
use std::time::Duration;

use saga::{OrderCancellation, ResumeSummary};
use store::Database;
use tokio::time::MissedTickBehavior;

pub use config::{Config, LogFormat};
pub use error::{ReconcilerError, Result};

/// Periodically replays pending compensations.
pub struct Reconciler<D> {
    cancellation: OrderCancellation<D>,
    interval: Duration,
}

impl<D: Database + Clone> Reconciler<D> {
    pub fn new(cancellation: OrderCancellation<D>, interval: Duration) -> Self {
        Self {
            cancellation,
            interval,
        }
    }

    /// Replays every open compensation once.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<ResumeSummary> {
        metrics::counter!("reconciler_runs_total").increment(1);
        let summary = self.cancellation.resume_pending().await?;

        if summary.total() == 0 {
            tracing::debug!("no open compensations");
        } else {
            tracing::info!(
                completed = summary.completed,
                failed = summary.failed,
                skipped = summary.skipped,
                "reconciliation pass finished"
            );
        }
        Ok(summary)
    }

    /// Runs passes until `shutdown` resolves, returning the number of passes.
    ///
    /// The first pass starts immediately. A failed pass is logged and the
    /// next tick tries again.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut passes = 0;
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    passes += 1;
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "reconciliation pass failed");
                    }
                }
            }
        }

        tracing::info!(passes, "reconciler stopped");
        passes
    }
}
