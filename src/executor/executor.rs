//! Worker Pool Implementation
//!
//! Spawns the worker loops and the lease reclaimer, and drives each claimed
//! batch through the processing step.
//!
//! ## Responsibilities
//! - **Polling**: claim a batch; sleep one poll interval when nothing is pending.
//! - **Lease Management**: a sidecar task renews the batch's lease while it runs.
//! - **Execution**: every row runs and reports as its own task, so an error,
//!   panic or hang in one row never keeps its siblings from being reported.
//!   A step is cut off after one lease duration.
//! - **Shutdown**: cooperative, checked between claims and during idle sleeps.

use super::claim::ClaimManager;
use super::reclaimer::LeaseReclaimer;
use super::registry::EventProcessor;
use super::types::ExecutorConfig;
use crate::backlog::types::{EventRecord, LeaseOwner, Outcome};
use crate::backlog::BacklogStore;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// The engine that drives event processing.
pub struct TaskExecutor {
    claims: Arc<ClaimManager>,
    reclaimer: Arc<LeaseReclaimer>,
    processor: Arc<dyn EventProcessor>,
    config: ExecutorConfig,
    cancel: CancellationToken,
}

/// Running worker pool. Dropping it does not stop the workers; call
/// [`ExecutorHandle::shutdown`].
pub struct ExecutorHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ExecutorHandle {
    /// Stops claiming, lets in-flight batches finish and waits for every task.
    pub async fn shutdown(self) {
        self.cancel.cancel();

        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "executor task ended abnormally");
            }
        }

        tracing::info!("task executor stopped");
    }
}

impl TaskExecutor {
    pub fn new(
        store: Arc<dyn BacklogStore>,
        processor: Arc<dyn EventProcessor>,
        config: ExecutorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            claims: ClaimManager::new(store.clone(), config.lease_duration),
            reclaimer: LeaseReclaimer::new(store, config.reclaim_interval),
            processor,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Spawns the worker loops plus the reclaimer and returns immediately.
    pub fn start(self: Arc<Self>) -> ExecutorHandle {
        tracing::info!(
            instance = %self.config.instance,
            workers = self.config.workers,
            batch_size = self.config.batch_size,
            "starting task executor"
        );

        let mut tasks = Vec::with_capacity(self.config.workers + 1);

        tasks.push(tokio::spawn(
            self.reclaimer.clone().run(self.cancel.child_token()),
        ));

        for worker_id in 0..self.config.workers {
            let executor = self.clone();
            tasks.push(tokio::spawn(async move {
                executor.worker_loop(worker_id).await;
            }));
        }

        ExecutorHandle {
            cancel: self.cancel.clone(),
            tasks,
        }
    }

    /// The main loop of a single worker.
    ///
    /// 1. Claims a batch under a fresh lease token.
    /// 2. Sleeps one poll interval when the claim is empty or the store failed.
    /// 3. Otherwise processes the batch; each row reports when it finishes.
    async fn worker_loop(&self, worker_id: usize) {
        tracing::debug!(worker_id, "worker started");

        while !self.cancel.is_cancelled() {
            let owner = LeaseOwner::mint(&self.config.instance, worker_id);

            match self.claims.claim(&owner, self.config.batch_size).await {
                Ok(rows) if rows.is_empty() => self.idle().await,
                Ok(rows) => self.process_batch(&owner, rows).await,
                Err(err) => {
                    tracing::warn!(worker_id, error = %err, "claim failed, skipping cycle");
                    self.idle().await;
                }
            }
        }

        tracing::debug!(worker_id, "worker stopped");
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }

    /// Runs every row of a batch concurrently.
    ///
    /// Each row reports its own outcome as soon as it finishes. A step still
    /// running after one lease duration is aborted and recorded as failed, so
    /// the batch never outlives its renewals by more than one lease.
    async fn process_batch(&self, owner: &LeaseOwner, rows: Vec<EventRecord>) {
        tracing::trace!(owner = %owner, count = rows.len(), "processing batch");

        let renewal = self.spawn_lease_renewal(owner);
        let mut running = JoinSet::new();

        for row in rows {
            let claims = self.claims.clone();
            let processor = self.processor.clone();
            let owner = owner.clone();
            let step_limit = self.config.lease_duration;

            running.spawn(async move {
                let key = row.key();
                let outcome = run_step(processor, row, step_limit).await;

                if let Outcome::Failed { reason } = &outcome {
                    tracing::warn!(key = %key, reason = %reason, "event processing failed");
                }

                if let Err(err) = claims.report(&key, &owner, &outcome).await {
                    // The row stays leased and comes back after expiry.
                    tracing::error!(key = %key, error = %err, "failed to report outcome");
                }
            });
        }

        while let Some(joined) = running.join_next().await {
            if let Err(err) = joined {
                tracing::error!(owner = %owner, error = %err, "report task ended abnormally");
            }
        }

        renewal.abort();
    }

    /// Periodically extends the lease of an in-flight batch.
    ///
    /// Stops on its own once the owner no longer holds any row.
    fn spawn_lease_renewal(&self, owner: &LeaseOwner) -> JoinHandle<()> {
        let claims = self.claims.clone();
        let owner = owner.clone();
        let every = self.config.renew_interval();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;

                match claims.renew(&owner).await {
                    Ok(0) => break,
                    Ok(renewed) => tracing::trace!(owner = %owner, renewed, "renewed lease"),
                    Err(err) => tracing::warn!(owner = %owner, error = %err, "lease renewal failed"),
                }
            }
        })
    }
}

/// Runs the processing step for one row in its own task, bounded by `limit`.
async fn run_step(processor: Arc<dyn EventProcessor>, row: EventRecord, limit: Duration) -> Outcome {
    let mut step = tokio::spawn(async move { processor.process(&row).await });

    match tokio::time::timeout(limit, &mut step).await {
        Ok(Ok(Ok(()))) => Outcome::Done,
        Ok(Ok(Err(err))) => Outcome::Failed {
            reason: format!("{:#}", err),
        },
        Ok(Err(err)) => Outcome::Failed {
            reason: panic_reason(err),
        },
        Err(_) => {
            step.abort();
            Outcome::Failed {
                reason: format!("processing timed out after {:?}", limit),
            }
        }
    }
}

fn panic_reason(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("processing task aborted: {}", err);
    }

    let panic = err.into_panic();
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());

    format!("processing panicked: {}", message)
}
