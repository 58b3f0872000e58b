use crate::OrchestratorError;
use std::collections::BTreeMap;
use std::fmt;
use tributary_pb::v1::{self, ModuleProgress};
use tributary_primitives::{BlockRange, ModuleGraph, Ranges};
use tributary_store::Snapshots;
use tributary_storage::ObjectStore;

/// What back-processing owes one module: the snapshot to start from, the
/// partial ranges still to compute, and the ones already sitting on storage.
#[derive(Debug, Clone, Default)]
pub struct WorkUnit {
    /// Module name.
    pub module_name: String,
    /// Range of the complete snapshot to initialize from, when one exists:
    /// `[module_initial_block, snapshot_end)`.
    pub initial_store_file: Option<BlockRange>,
    /// Save-interval ranges that must be computed.
    pub partials_missing: Ranges,
    /// Save-interval ranges already present on storage, needing only a
    /// squash.
    pub partials_present: Ranges,
}

impl WorkUnit {
    /// Groups the missing ranges into sub-request buckets of at most
    /// `sub_request_split` blocks.
    pub fn batch_requests(&self, sub_request_split: u64) -> Ranges {
        self.partials_missing.merged_buckets(sub_request_split)
    }

    /// The already-processed ranges reported as initial progress.
    pub fn initial_processed_partials(&self) -> Ranges {
        self.partials_present.merged()
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mod={:?}, initial={:?}, partials missing={}, present={}",
            self.module_name, self.initial_store_file, self.partials_missing, self.partials_present
        )
    }
}

/// Splits the work for one store module.
///
/// Walks save-interval boundaries from the end of the newest usable complete
/// snapshot (or the module's initial block) up to `request_start`,
/// classifying each produced range as present or missing.
pub fn stores_split_work(
    module_name: &str,
    save_interval: u64,
    module_initial_block: u64,
    request_start: u64,
    snapshots: &Snapshots,
) -> Result<WorkUnit, OrchestratorError> {
    let mut work = WorkUnit { module_name: module_name.to_owned(), ..Default::default() };

    if request_start <= module_initial_block {
        return Ok(work);
    }

    let complete = snapshots.last_complete_snapshot_before(request_start);
    if let Some(complete) = &complete {
        // A complete snapshot ending at or before the initial block cannot
        // exist; something else wrote into this module's namespace.
        if complete.exclusive_end_block <= module_initial_block {
            return Err(OrchestratorError::SnapshotBeforeInitialBlock {
                module: module_name.to_owned(),
                snapshot_end: complete.exclusive_end_block,
                initial_block: module_initial_block,
            });
        }
    }

    let mut back_process_start = module_initial_block;
    if let Some(complete) = complete {
        back_process_start = complete.exclusive_end_block;
        work.initial_store_file =
            Some(BlockRange::new(module_initial_block, complete.exclusive_end_block));
        if complete.exclusive_end_block == request_start {
            return Ok(work);
        }
    }

    let mut ptr = back_process_start;
    while ptr < request_start {
        let end = (ptr - ptr % save_interval + save_interval).min(request_start);
        let partial = BlockRange::new(ptr, end);
        if snapshots.contains_partial(&partial) {
            work.partials_present.push(partial);
        } else {
            work.partials_missing.push(partial);
        }
        ptr = end;
    }

    Ok(work)
}

/// Splits the work for a mapper module. The decomposition is the same as
/// for stores, but the "initial file" is the contiguous run of sealed
/// output-cache chunks starting at the module's initial block, and the
/// remaining chunks count as present partials.
pub fn maps_split_work(
    module_name: &str,
    save_interval: u64,
    module_initial_block: u64,
    request_start: u64,
    cached: &Ranges,
) -> Result<WorkUnit, OrchestratorError> {
    let merged = cached.merged();
    let completes = merged
        .iter()
        .find(|r| r.contains(module_initial_block) || r.start_block == module_initial_block)
        .map(|r| BlockRange::new(module_initial_block, r.exclusive_end_block))
        .into_iter()
        .collect::<Ranges>();
    let snapshots = Snapshots::new(completes, cached.clone());
    stores_split_work(module_name, save_interval, module_initial_block, request_start, &snapshots)
}

/// The full back-processing plan: one [`WorkUnit`] per module, keyed by
/// name.
#[derive(Debug, Clone, Default)]
pub struct WorkPlan(
    /// Work units by module name.
    pub BTreeMap<String, WorkUnit>,
);

impl WorkPlan {
    /// Builds the plan for every module of the graph by cataloging what
    /// already exists on storage.
    pub async fn build(
        graph: &ModuleGraph,
        storage: &dyn ObjectStore,
        save_interval: u64,
        request_start: u64,
    ) -> Result<Self, OrchestratorError> {
        let mut plan = BTreeMap::new();
        for desc in graph.modules() {
            let unit = if desc.is_store() {
                let snapshots = Snapshots::gather(storage, &desc.hash).await?;
                stores_split_work(
                    &desc.name,
                    save_interval,
                    desc.initial_block,
                    request_start,
                    &snapshots,
                )?
            } else {
                let cached = tributary_cache::cached_ranges(storage, &desc.hash).await?;
                maps_split_work(
                    &desc.name,
                    save_interval,
                    desc.initial_block,
                    request_start,
                    &cached,
                )?
            };
            plan.insert(desc.name.clone(), unit);
        }
        Ok(Self(plan))
    }

    /// All missing ranges across modules, bucketed into sub-requests of at
    /// most `sub_request_split` blocks. Workers execute the whole graph per
    /// bucket, so overlapping module needs collapse into one request.
    pub fn missing_buckets(&self, sub_request_split: u64) -> Ranges {
        let mut missing = Ranges::default();
        for unit in self.0.values() {
            for range in &unit.partials_missing {
                missing.push(*range);
            }
        }
        missing.merged_buckets(sub_request_split)
    }

    /// The user-visible back-processing indicators: per module, the ranges
    /// that already exist and will not be recomputed.
    pub fn progress_messages(&self) -> Vec<ModuleProgress> {
        let mut out = Vec::new();
        for (name, unit) in &self.0 {
            let mut processed_ranges: Vec<v1::BlockRange> = Vec::new();
            if let Some(initial) = unit.initial_store_file {
                processed_ranges.push(initial.into());
            }
            processed_ranges
                .extend(unit.initial_processed_partials().iter().map(|r| v1::BlockRange::from(*r)));
            if processed_ranges.is_empty() {
                continue;
            }
            out.push(ModuleProgress { name: name.clone(), processed_ranges });
        }
        out
    }
}

impl fmt::Display for WorkPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for unit in self.0.values() {
            if !first {
                write!(f, ";")?;
            }
            write!(f, "{unit}")?;
            first = false;
        }
        Ok(())
    }
}
