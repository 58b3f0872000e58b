use crate::{OrchestratorError, Squasher, WorkPlan, Worker, WorkerError};
use std::{sync::Arc, time::Duration};
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tributary_primitives::{BlockRange, ModuleGraph, Ranges};
use tributary_storage::SharedStore;
use tributary_store::{Store, StoreConfig};

/// Back-processing configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Blocks per snapshot and partial file.
    pub save_interval: u64,
    /// Upper bound on blocks covered by one sub-request.
    pub sub_request_split: u64,
    /// Concurrent sub-requests in flight.
    pub concurrency: usize,
    /// Attempts per sub-request, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub retry_base_delay: Duration,
}

impl OrchestratorConfig {
    /// A configuration with sensible retry defaults.
    pub fn new(save_interval: u64, sub_request_split: u64, concurrency: usize) -> Self {
        Self {
            save_interval,
            sub_request_split,
            concurrency,
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

/// Coordinates the reconstruction of historical store state: plans the
/// missing partial ranges, dispatches them as parallel sub-requests, and
/// squashes the produced partials into complete snapshots that future runs
/// start from.
pub struct Orchestrator {
    config: OrchestratorConfig,
    graph: ModuleGraph,
    storage: SharedStore,
    worker: Arc<dyn Worker>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").field("config", &self.config).finish()
    }
}

impl Orchestrator {
    /// Creates an orchestrator dispatching sub-requests to `worker`.
    pub fn new(
        config: OrchestratorConfig,
        graph: ModuleGraph,
        storage: SharedStore,
        worker: Arc<dyn Worker>,
    ) -> Self {
        Self { config, graph, storage, worker }
    }

    /// Reconstructs every store up to `request_start` and returns the plan
    /// that was executed, from which progress messages derive.
    pub async fn back_process(
        &self,
        request_start: u64,
        cancel: CancellationToken,
    ) -> Result<WorkPlan, OrchestratorError> {
        let plan = WorkPlan::build(
            &self.graph,
            self.storage.as_ref(),
            self.config.save_interval,
            request_start,
        )
        .await?;
        info!(target: "orchestrator", %plan, request_start, "built work plan");

        let squasher =
            Squasher::new(self.build_stores(), &plan, request_start).await.map(Arc::new)?;
        squasher.squash_partials_present(&plan).await?;

        let buckets = plan.missing_buckets(self.config.sub_request_split);
        metrics::gauge!("tributary_orchestrator_sub_requests").set(buckets.len() as f64);

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks: JoinSet<Result<BlockRange, OrchestratorError>> = JoinSet::new();
        for bucket in buckets {
            let worker = self.worker.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let max_attempts = self.config.max_attempts;
            let base_delay = self.config.retry_base_delay;
            tasks.spawn(async move {
                let _permit =
                    semaphore.acquire().await.expect("semaphore is never closed");
                run_sub_request(worker, bucket, cancel, max_attempts, base_delay).await?;
                Ok(bucket)
            });
        }

        // Squash as buckets land, in completion order; the per-module
        // pending queues put them back in range order.
        while let Some(joined) = tasks.join_next().await {
            let bucket = match joined {
                Ok(Ok(bucket)) => bucket,
                Ok(Err(err)) => {
                    cancel.cancel();
                    return Err(err);
                }
                Err(join_err) => {
                    cancel.cancel();
                    return Err(OrchestratorError::SubRequest {
                        range: BlockRange::new(0, 0),
                        attempts: 0,
                        source: WorkerError::Fatal(join_err.to_string()),
                    });
                }
            };
            metrics::counter!("tributary_orchestrator_sub_requests_done_total").increment(1);
            for desc in self.graph.stores() {
                let partials =
                    bucket_partials(bucket, desc.initial_block, self.config.save_interval);
                squasher.squash(&desc.name, &partials).await?;
            }
        }

        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        squasher.ensure_done().await?;
        info!(target: "orchestrator", request_start, "back-processing complete");
        Ok(plan)
    }

    /// Fresh store images for the squasher, one per store module.
    fn build_stores(&self) -> Vec<Store> {
        self.graph
            .stores()
            .filter_map(|desc| {
                let (policy, value_type) = (desc.update_policy?, desc.value_type?);
                let config = StoreConfig::new(
                    desc.name.clone(),
                    desc.hash.clone(),
                    desc.initial_block,
                    self.config.save_interval,
                    policy,
                    value_type,
                );
                Some(Store::new(config, self.storage.clone()))
            })
            .collect()
    }
}

/// Runs one sub-request with exponential backoff on transient failures.
async fn run_sub_request(
    worker: Arc<dyn Worker>,
    bucket: BlockRange,
    cancel: CancellationToken,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<(), OrchestratorError> {
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        match worker.process(bucket, cancel.clone()).await {
            Ok(()) => return Ok(()),
            Err(WorkerError::Transient(reason)) if attempt + 1 < max_attempts => {
                let delay = base_delay * 2u32.pow(attempt.min(16));
                warn!(
                    target: "orchestrator",
                    %bucket,
                    attempt,
                    ?delay,
                    %reason,
                    "sub-request failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(source) => {
                return Err(OrchestratorError::SubRequest {
                    range: bucket,
                    attempts: attempt + 1,
                    source,
                })
            }
        }
    }
}

/// The save-interval partial ranges a worker produced for one store module
/// within `bucket`: the same boundary walk the planner does.
fn bucket_partials(bucket: BlockRange, module_initial_block: u64, save_interval: u64) -> Ranges {
    let mut out = Ranges::default();
    let mut ptr = bucket.start_block.max(module_initial_block);
    while ptr < bucket.exclusive_end_block {
        let end = (ptr - ptr % save_interval + save_interval).min(bucket.exclusive_end_block);
        out.push(BlockRange::new(ptr, end));
        ptr = end;
    }
    out
}
