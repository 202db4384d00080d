//! Scheduler
//!
//! Runs each [`Job`] on its own fixed interval: once immediately, then every
//! period. A job never overlaps itself; ticks missed while it runs are skipped.
//! Failures are logged and the loop carries on. Cancelling the token stops
//! every loop and abandons in-flight iterations at their next await point.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Error type returned by a job iteration
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// A unit of periodic work
#[async_trait]
pub trait Job: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), JobError>;
}

/// Run `job` every `period` until `cancel` fires.
///
/// Returns the number of iterations started.
pub async fn run_periodic(job: Arc<dyn Job>, period: Duration, cancel: CancellationToken) -> u64 {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut iteration = 0u64;

    info!(
        job = job.name(),
        period_secs = period.as_secs(),
        "Starting periodic job"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        iteration += 1;
        let started = Instant::now();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(job = job.name(), iteration, "Abandoning in-flight iteration");
                break;
            }
            result = job.run() => match result {
                Ok(()) => info!(
                    job = job.name(),
                    iteration,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Iteration complete"
                ),
                Err(e) => error!(
                    job = job.name(),
                    iteration,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "Iteration failed"
                ),
            }
        }
    }

    info!(job = job.name(), iterations = iteration, "Periodic job stopped");
    iteration
}

/// Owns the spawned job loops and their shared cancellation token
#[derive(Default)]
pub struct Scheduler {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<u64>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that stops every loop when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn `job` on its own task
    pub fn spawn(&mut self, job: Arc<dyn Job>, period: Duration) {
        let cancel = self.cancel.child_token();
        self.handles
            .push(tokio::spawn(run_periodic(job, period, cancel)));
    }

    /// Cancel every loop and wait for them to stop
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Job task panicked or was aborted: {}", e);
            }
        }
    }
}
