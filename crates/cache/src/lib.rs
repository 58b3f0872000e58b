//! Range-chunked persistence of per-block module outputs.
//!
//! Every module owns a cache namespace under `outputs/<moduleHash>/`. One
//! chunk memoizes the module's outputs for exactly one save interval of
//! blocks: mapper output bytes, or the serialized delta list for stores.
//! Chunks are append-only while current, then sealed to storage atomically
//! and never touched again; re-executing a block with the same inputs must
//! produce bit-identical chunk bytes.

mod chunk;
mod error;

pub use chunk::{chunk_file_name, parse_chunk_file_name};
pub use error::CacheError;

use bytes::Bytes;
use std::collections::BTreeMap;
use tracing::{debug, trace};
use tributary_primitives::{BlockRange, Clock, Cursor, ModuleHash, Ranges};
use tributary_storage::{retry_transient, RetryPolicy, SharedStore};

/// The memoization layer for one module's outputs.
///
/// A single writer owns the cache for a given `(module, range)`; concurrent
/// back-processing workers operate on disjoint ranges and never share one.
pub struct OutputCache {
    module_name: String,
    module_hash: ModuleHash,
    save_interval: u64,
    current_range: BlockRange,
    kv: BTreeMap<u64, Bytes>,
    cursor: Cursor,
    /// Whether the current chunk was read back from storage, i.e. its
    /// entries memoize a previous run.
    loaded: bool,
    storage: SharedStore,
}

impl std::fmt::Debug for OutputCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputCache")
            .field("module", &self.module_name)
            .field("range", &self.current_range)
            .field("entries", &self.kv.len())
            .field("loaded", &self.loaded)
            .finish()
    }
}

impl OutputCache {
    /// Creates a cache positioned at the save-interval chunk containing the
    /// module's initial block. Call [`load_at_or_before`](Self::load_at_or_before)
    /// to position it elsewhere.
    pub fn new(
        module_name: impl Into<String>,
        module_hash: ModuleHash,
        save_interval: u64,
        storage: SharedStore,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            module_hash,
            save_interval,
            current_range: BlockRange::new(0, save_interval),
            kv: BTreeMap::new(),
            cursor: Cursor::default(),
            loaded: false,
            storage,
        }
    }

    /// The chunk range currently being read or written.
    pub fn current_range(&self) -> BlockRange {
        self.current_range
    }

    /// The cursor recorded for the current chunk.
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Returns `true` if `block` falls inside a chunk that was previously
    /// sealed and has been read back, meaning outputs for it can be served
    /// without executing anything.
    pub fn covers(&self, block: u64) -> bool {
        self.loaded && self.current_range.contains(block)
    }

    /// Positions the cache for `block`: the sealed chunk containing it if
    /// one exists, else the most recent sealed chunk ending at or before it
    /// (recovering the resume cursor), else a fresh chunk at the
    /// save-interval boundary of `block`. Returns `true` when an existing
    /// chunk was loaded.
    pub async fn load_at_or_before(&mut self, block: u64) -> Result<bool, CacheError> {
        let chunks = self.list_chunks().await?;

        let target = chunks
            .iter()
            .find(|r| r.contains(block))
            .or_else(|| {
                chunks
                    .iter()
                    .filter(|r| r.exclusive_end_block <= block)
                    .max_by_key(|r| r.exclusive_end_block)
            })
            .copied();

        match target {
            Some(range) => {
                let name = chunk_file_name(&self.module_hash, &range);
                let content = retry_transient(RetryPolicy::default(), "read output chunk", || {
                    self.storage.read(&name)
                })
                .await?;
                let (cursor, kv) = chunk::decode_chunk(&content)
                    .map_err(|reason| CacheError::ChunkCorrupt { name: name.clone(), reason })?;
                debug!(
                    target: "cache",
                    module = %self.module_name,
                    chunk = %range,
                    entries = kv.len(),
                    "loaded output chunk"
                );
                self.current_range = range;
                self.kv = kv;
                self.cursor = cursor;
                self.loaded = true;
                Ok(true)
            }
            None => {
                self.current_range = Self::fresh_range(block, self.save_interval);
                self.kv.clear();
                self.cursor = Cursor::default();
                self.loaded = false;
                Ok(false)
            }
        }
    }

    /// Positions the cache for reading *and writing* `block`: loads the
    /// sealed chunk containing it when one exists, otherwise starts the
    /// fresh chunk at `block`'s save boundary. The recovered cursor of an
    /// earlier chunk, when that is all
    /// [`load_at_or_before`](Self::load_at_or_before) found, is kept for
    /// resumption but its entries are not writable.
    pub async fn position_at(&mut self, block: u64) -> Result<bool, CacheError> {
        let loaded = self.load_at_or_before(block).await?;
        if !self.current_range.contains(block) {
            self.current_range = Self::fresh_range(block, self.save_interval);
            self.kv.clear();
            self.loaded = false;
            return Ok(false);
        }
        Ok(loaded)
    }

    /// A fresh chunk starts at the first block it will actually hold and
    /// runs to the next save boundary, so sealing it never claims blocks
    /// that were not processed. The first chunk of an unaligned start is
    /// simply short.
    fn fresh_range(block: u64, save_interval: u64) -> BlockRange {
        BlockRange::new(block, block - block % save_interval + save_interval)
    }

    /// The memoized payload for the given block, if any.
    pub fn get(&self, clock: &Clock) -> Option<Bytes> {
        if !self.current_range.contains(clock.number) {
            return None;
        }
        self.kv.get(&clock.number).cloned()
    }

    /// Records the payload produced at `clock`.
    ///
    /// # Panics
    ///
    /// Panics if `clock.number` is outside the current chunk range: the
    /// pipeline guarantees ordered writes, so an out-of-range write is a
    /// logic error, not a runtime condition.
    pub fn set(&mut self, clock: &Clock, cursor: &Cursor, payload: Bytes) {
        if !self.current_range.contains(clock.number) {
            panic!(
                "output cache {}: block {} written outside of current chunk {}",
                self.module_name, clock.number, self.current_range
            );
        }
        trace!(
            target: "cache",
            module = %self.module_name,
            block = clock.number,
            bytes = payload.len(),
            "cached output"
        );
        self.kv.insert(clock.number, payload);
        self.cursor = cursor.clone();
    }

    /// Atomically seals the current chunk to storage and advances to the
    /// next range. Sealing an already-loaded chunk rewrites identical bytes.
    pub async fn save(&mut self) -> Result<(), CacheError> {
        let name = chunk_file_name(&self.module_hash, &self.current_range);
        let content = chunk::encode_chunk(&self.cursor, &self.kv);
        retry_transient(RetryPolicy::default(), "seal output chunk", || {
            self.storage.put(&name, content.clone())
        })
        .await?;
        debug!(
            target: "cache",
            module = %self.module_name,
            chunk = %self.current_range,
            entries = self.kv.len(),
            "sealed output chunk"
        );

        self.current_range = self.current_range.next(self.save_interval);
        self.kv.clear();
        self.cursor = Cursor::default();
        self.loaded = false;
        Ok(())
    }

    /// Ranges of every sealed chunk for this module, sorted by start block.
    pub async fn list_chunks(&self) -> Result<Ranges, CacheError> {
        cached_ranges(self.storage.as_ref(), &self.module_hash).await
    }
}

/// Ranges of every sealed chunk for `hash`, sorted by start block.
pub async fn cached_ranges(
    storage: &dyn tributary_storage::ObjectStore,
    hash: &ModuleHash,
) -> Result<Ranges, CacheError> {
    let prefix = format!("outputs/{hash}/");
    let names =
        retry_transient(RetryPolicy::default(), "list output chunks", || storage.list(&prefix))
            .await?;
    let mut ranges = Ranges::default();
    for name in names {
        if let Some(range) = parse_chunk_file_name(&name) {
            ranges.push(range);
        }
    }
    ranges.sort();
    Ok(ranges)
}
