use crate::snapshot::{parse_state_file_name, StateFile};
use crate::StoreError;
use tributary_primitives::{BlockRange, ModuleHash, Ranges};
use tributary_storage::{retry_transient, ObjectStore, RetryPolicy};

/// Catalog of the state files that exist on storage for one module.
///
/// Complete snapshots all start at the module's initial block and form a
/// chain totally ordered by their end block; partials cover interior
/// save-interval ranges produced by back-processing workers.
#[derive(Debug, Clone, Default)]
pub struct Snapshots {
    completes: Ranges,
    partials: Ranges,
}

impl Snapshots {
    /// Builds a catalog from explicit range sets. Used directly by tests and
    /// by the mapper planning path, where "snapshots" are cache chunks.
    pub fn new(completes: Ranges, partials: Ranges) -> Self {
        let mut completes = completes;
        completes.sort();
        let mut partials = partials;
        partials.sort();
        Self { completes, partials }
    }

    /// Lists `states/<hash>/` and classifies every parseable file.
    pub async fn gather(
        storage: &dyn ObjectStore,
        hash: &ModuleHash,
    ) -> Result<Self, StoreError> {
        let prefix = format!("states/{hash}/");
        let names =
            retry_transient(RetryPolicy::default(), "list state files", || storage.list(&prefix))
                .await?;
        let mut completes = Ranges::default();
        let mut partials = Ranges::default();
        for name in names {
            match parse_state_file_name(&name) {
                Some(StateFile { range, partial: false }) => completes.push(range),
                Some(StateFile { range, partial: true }) => partials.push(range),
                None => continue,
            }
        }
        Ok(Self::new(completes, partials))
    }

    /// The complete snapshot with the greatest end block not exceeding
    /// `block`, if any.
    pub fn last_complete_snapshot_before(&self, block: u64) -> Option<BlockRange> {
        self.completes
            .iter()
            .filter(|r| r.exclusive_end_block <= block)
            .max_by_key(|r| r.exclusive_end_block)
            .copied()
    }

    /// Returns `true` if a partial file covering exactly `range` exists.
    pub fn contains_partial(&self, range: &BlockRange) -> bool {
        self.partials.contains(range)
    }

    /// All partial ranges, sorted by start block.
    pub fn partials(&self) -> &Ranges {
        &self.partials
    }

    /// All complete snapshot ranges, sorted by start block.
    pub fn completes(&self) -> &Ranges {
        &self.completes
    }
}
