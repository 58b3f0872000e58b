use crate::{OrchestratorError, WorkPlan};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use tributary_primitives::{BlockRange, Ranges};
use tributary_store::{StateFile, Store};

/// Squash progress for one store module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SquashState {
    /// Waiting for the partial starting at the high-water mark.
    Waiting,
    /// The image reaches the request start; the complete snapshot exists.
    Done,
}

/// Merges one module's partials, in range order, into a single image.
struct StoreSquasher {
    store: Store,
    /// Start block the next merged partial must have.
    next_expected_start: u64,
    /// Exclusive end of the squash: the request start block.
    target: u64,
    /// Delivered partial ranges not merged yet.
    pending: Vec<BlockRange>,
    state: SquashState,
}

impl StoreSquasher {
    fn new(store: Store, initial_end: Option<u64>, target: u64) -> Self {
        let next_expected_start = initial_end.unwrap_or_else(|| store.module_initial_block());
        let state = if next_expected_start >= target { SquashState::Done } else { SquashState::Waiting };
        Self { store, next_expected_start, target, pending: Vec::new(), state }
    }

    /// Accepts newly available partials and merges every one that extends
    /// the image. When the image reaches the target the complete snapshot
    /// `[module_initial_block, target)` is written.
    async fn squash(&mut self, partials: &Ranges) -> Result<(), OrchestratorError> {
        if self.state == SquashState::Done {
            return Ok(());
        }

        for range in partials {
            // Ranges behind the high-water mark were already merged (e.g.
            // a retried worker re-announcing its bucket).
            if range.start_block >= self.next_expected_start && !self.pending.contains(range) {
                self.pending.push(*range);
            }
        }
        self.pending.sort_by_key(|r| r.start_block);

        while let Some(next) = self.pending.first().copied() {
            if next.start_block != self.next_expected_start {
                break;
            }
            self.pending.remove(0);

            let mut partial = Store::new(self.store.config().clone(), self.store.storage());
            partial.load(&StateFile { range: next, partial: true }).await?;
            self.store.merge(&partial)?;
            self.next_expected_start = next.exclusive_end_block;
            debug!(
                target: "orchestrator::squasher",
                store = %self.store.name(),
                merged = %next,
                up_to = self.next_expected_start,
                "squashed partial"
            );
        }

        if self.next_expected_start >= self.target {
            let name = self.store.write_snapshot(self.target).await?;
            self.state = SquashState::Done;
            info!(
                target: "orchestrator::squasher",
                store = %self.store.name(),
                file = %name,
                "squash complete, wrote snapshot"
            );
        }
        Ok(())
    }
}

/// The per-module squash coordinator.
///
/// Partials may be delivered in any order; each module's squasher merges
/// them as soon as the range abutting its high-water mark shows up, and
/// writes the module's complete snapshot once the mark reaches the request
/// start. Each module's state sits behind its own mutex: deliveries for
/// different modules never contend.
pub struct Squasher {
    stores: HashMap<String, Arc<Mutex<StoreSquasher>>>,
}

impl std::fmt::Debug for Squasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Squasher").field("modules", &self.stores.len()).finish()
    }
}

impl Squasher {
    /// Creates one squasher per store of `stores`, initializing each image
    /// from the plan's initial snapshot when there is one.
    pub async fn new(
        stores: Vec<Store>,
        plan: &WorkPlan,
        request_start: u64,
    ) -> Result<Self, OrchestratorError> {
        let mut map = HashMap::new();
        for mut store in stores {
            let unit = plan.0.get(store.name());
            let initial = unit.and_then(|u| u.initial_store_file);
            if let Some(initial) = initial {
                store.load(&StateFile { range: initial, partial: false }).await?;
            }
            let name = store.name().to_owned();
            let squasher = StoreSquasher::new(
                store,
                initial.map(|r| r.exclusive_end_block),
                request_start,
            );
            map.insert(name, Arc::new(Mutex::new(squasher)));
        }
        Ok(Self { stores: map })
    }

    /// Delivers partials for one module.
    pub async fn squash(
        &self,
        module_name: &str,
        partials: &Ranges,
    ) -> Result<(), OrchestratorError> {
        let Some(squasher) = self.stores.get(module_name) else { return Ok(()) };
        squasher.lock().await.squash(partials).await
    }

    /// Seeds every module with the partials the plan found already present.
    pub async fn squash_partials_present(&self, plan: &WorkPlan) -> Result<(), OrchestratorError> {
        for (name, unit) in &plan.0 {
            if unit.partials_present.is_empty() {
                continue;
            }
            self.squash(name, &unit.partials_present).await?;
        }
        Ok(())
    }

    /// Verifies every module finished, returning the first shortfall.
    pub async fn ensure_done(&self) -> Result<(), OrchestratorError> {
        for (name, squasher) in &self.stores {
            let squasher = squasher.lock().await;
            if squasher.state != SquashState::Done {
                return Err(OrchestratorError::Incomplete {
                    module: name.clone(),
                    reached: squasher.next_expected_start,
                    target: squasher.target,
                });
            }
        }
        Ok(())
    }
}
