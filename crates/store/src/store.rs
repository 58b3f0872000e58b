use crate::{
    snapshot::{self, StateFile},
    value, StoreError,
};
use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use std::collections::HashMap;
use tracing::{debug, trace};
use tributary_pb::v1::{store_delta::Operation, StoreDelta};
use tributary_primitives::{BlockRange, ModuleHash, UpdatePolicy, ValueType};
use tributary_storage::{retry_transient, RetryPolicy, SharedStore};

/// Fixed bound on key sizes, in bytes.
pub const MAX_KEY_SIZE: usize = 1024;

/// Default per-key cap on values produced by `append`, in bytes.
pub const DEFAULT_MAX_APPEND_SIZE: usize = 8 * 1024;

/// Static description of a store, fixed at creation.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Module name owning the store.
    pub name: String,
    /// Module hash, namespacing persisted state.
    pub module_hash: ModuleHash,
    /// First block the owning module is defined for.
    pub module_initial_block: u64,
    /// Blocks per snapshot.
    pub save_interval: u64,
    /// How writes combine with existing values.
    pub update_policy: UpdatePolicy,
    /// Value domain for numeric operations.
    pub value_type: ValueType,
    /// Per-key cap on `append` results.
    pub max_append_size: usize,
}

impl StoreConfig {
    /// Creates a config with the default append cap.
    pub fn new(
        name: impl Into<String>,
        module_hash: ModuleHash,
        module_initial_block: u64,
        save_interval: u64,
        update_policy: UpdatePolicy,
        value_type: ValueType,
    ) -> Self {
        Self {
            name: name.into(),
            module_hash,
            module_initial_block,
            save_interval,
            update_policy,
            value_type,
            max_append_size: DEFAULT_MAX_APPEND_SIZE,
        }
    }
}

/// A stateful key/value accumulator owned by a single store module.
///
/// All mutation goes through the policy-checked write operations, each of
/// which records exactly one delta per touched key. The delta journal always
/// reproduces the transformation from the pre-block `kv` to the current one
/// when replayed in order.
pub struct Store {
    config: StoreConfig,
    kv: HashMap<String, Vec<u8>>,
    deltas: Vec<StoreDelta>,
    last_ordinal: u64,
    storage: SharedStore,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.config.name)
            .field("hash", &self.config.module_hash)
            .field("keys", &self.kv.len())
            .field("deltas", &self.deltas.len())
            .finish()
    }
}

impl Store {
    /// Creates an empty store.
    pub fn new(config: StoreConfig, storage: SharedStore) -> Self {
        Self { config, kv: HashMap::new(), deltas: Vec::new(), last_ordinal: 0, storage }
    }

    /// The store's static configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Module name owning the store.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Module hash namespacing this store's files.
    pub fn module_hash(&self) -> &ModuleHash {
        &self.config.module_hash
    }

    /// First block the owning module is defined for.
    pub fn module_initial_block(&self) -> u64 {
        self.config.module_initial_block
    }

    /// Blocks per snapshot.
    pub fn save_interval(&self) -> u64 {
        self.config.save_interval
    }

    /// The store's update policy.
    pub fn update_policy(&self) -> UpdatePolicy {
        self.config.update_policy
    }

    /// The store's value type.
    pub fn value_type(&self) -> ValueType {
        self.config.value_type
    }

    /// The current key/value mapping.
    pub fn kv(&self) -> &HashMap<String, Vec<u8>> {
        &self.kv
    }

    /// Replaces the entire key/value mapping, e.g. when rehydrating from a
    /// decoded snapshot or resetting between partial ranges.
    pub fn replace_kv(&mut self, kv: HashMap<String, Vec<u8>>) {
        self.kv = kv;
    }

    /// A clone of the underlying storage handle.
    pub fn storage(&self) -> SharedStore {
        self.storage.clone()
    }

    /// Deltas recorded since the last [`clear_deltas`](Self::clear_deltas).
    pub fn deltas(&self) -> &[StoreDelta] {
        &self.deltas
    }

    /// Ordinal of the most recent delta.
    pub fn last_ordinal(&self) -> u64 {
        self.last_ordinal
    }

    // --- reads ------------------------------------------------------------

    /// Reads `key` from the current `kv`. Stores always observe their own
    /// writes within a block, whatever the ordinal.
    pub fn get_at(&self, _ord: u64, key: &str) -> Option<&Vec<u8>> {
        self.kv.get(key)
    }

    /// Reads `key` as of the start of the current block, before any of this
    /// block's deltas were applied.
    pub fn get_first(&self, key: &str) -> Option<Vec<u8>> {
        let mut value = self.kv.get(key).cloned();
        for delta in self.deltas.iter().rev() {
            if delta.key != key {
                continue;
            }
            value = match delta.operation {
                op if op == Operation::Create as i32 => None,
                _ => Some(delta.old_value.clone()),
            };
        }
        value
    }

    /// Reads the final value of `key` after all recorded deltas.
    pub fn get_last(&self, key: &str) -> Option<&Vec<u8>> {
        self.kv.get(key)
    }

    // --- writes -----------------------------------------------------------

    /// Unconditionally replaces the value under `key`.
    pub fn set(&mut self, ord: u64, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.check_policy(UpdatePolicy::Set, "set")?;
        self.check_key(key)?;
        self.record(ord, key, Some(value));
        Ok(())
    }

    /// Writes `value` under `key` only if the key does not exist yet.
    pub fn set_if_not_exists(
        &mut self,
        ord: u64,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), StoreError> {
        self.check_policy(UpdatePolicy::SetIfNotExists, "set_if_not_exists")?;
        self.check_key(key)?;
        if self.kv.contains_key(key) {
            return Ok(());
        }
        self.record(ord, key, Some(value));
        Ok(())
    }

    /// Concatenates `suffix` to the value under `key`, subject to the
    /// per-key size cap. A rejected append records no delta and leaves the
    /// value untouched.
    pub fn append(&mut self, ord: u64, key: &str, suffix: &[u8]) -> Result<(), StoreError> {
        self.check_policy(UpdatePolicy::Append, "append")?;
        self.check_key(key)?;

        let mut value = self.kv.get(key).cloned().unwrap_or_default();
        let size = value.len() + suffix.len();
        if size > self.config.max_append_size {
            return Err(StoreError::ValueTooLarge {
                store: self.config.name.clone(),
                key: key.to_owned(),
                size,
                max: self.config.max_append_size,
            });
        }
        value.extend_from_slice(suffix);
        self.record(ord, key, Some(value));
        Ok(())
    }

    /// Deletes every key beginning with `prefix`, recording one delete delta
    /// per removed key. Valid under every update policy.
    pub fn delete_prefix(&mut self, ord: u64, prefix: &str) -> Result<(), StoreError> {
        let mut doomed: Vec<String> =
            self.kv.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        // Deterministic delta order regardless of map iteration order.
        doomed.sort();
        for key in doomed {
            self.record(ord, &key, None);
        }
        Ok(())
    }

    /// Adds `delta` to the `int64` value under `key`, missing keys counting
    /// as zero.
    pub fn sum_int64(&mut self, ord: u64, key: &str, delta: i64) -> Result<(), StoreError> {
        self.check_numeric(UpdatePolicy::Add, ValueType::Int64, "add_int64")?;
        self.check_key(key)?;
        let current = self.parse_current(key, "int64", value::parse_int64)?.unwrap_or(0);
        self.record(ord, key, Some(value::format_int64(current.wrapping_add(delta))));
        Ok(())
    }

    /// Adds `delta` to the `bigint` value under `key`.
    pub fn sum_bigint(&mut self, ord: u64, key: &str, delta: &BigInt) -> Result<(), StoreError> {
        self.check_numeric(UpdatePolicy::Add, ValueType::BigInt, "add_bigint")?;
        self.check_key(key)?;
        let current = self.parse_current(key, "bigint", value::parse_bigint)?.unwrap_or_default();
        self.record(ord, key, Some(value::format_bigint(&(current + delta))));
        Ok(())
    }

    /// Adds `delta` to the `float64` value under `key`.
    pub fn sum_float64(&mut self, ord: u64, key: &str, delta: f64) -> Result<(), StoreError> {
        self.check_numeric(UpdatePolicy::Add, ValueType::Float64, "add_float64")?;
        self.check_key(key)?;
        let current = self.parse_current(key, "float64", value::parse_float64)?.unwrap_or(0.0);
        self.record(ord, key, Some(value::format_float64(current + delta)));
        Ok(())
    }

    /// Adds `delta` to the `bigfloat` value under `key`.
    pub fn sum_bigfloat(
        &mut self,
        ord: u64,
        key: &str,
        delta: &BigDecimal,
    ) -> Result<(), StoreError> {
        self.check_numeric(UpdatePolicy::Add, ValueType::BigFloat, "add_bigfloat")?;
        self.check_key(key)?;
        let current = self.parse_current(key, "bigfloat", value::parse_bigfloat)?.unwrap_or_default();
        self.record(ord, key, Some(value::format_bigfloat(&(current + delta))));
        Ok(())
    }

    /// Writes the smaller of the current `int64` value and `candidate`;
    /// missing keys take the candidate. Always records a delta carrying the
    /// winning value.
    pub fn set_min_int64(&mut self, ord: u64, key: &str, candidate: i64) -> Result<(), StoreError> {
        self.check_numeric(UpdatePolicy::Min, ValueType::Int64, "set_min_int64")?;
        self.check_key(key)?;
        let winner = match self.parse_current(key, "int64", value::parse_int64)? {
            Some(current) => current.min(candidate),
            None => candidate,
        };
        self.record(ord, key, Some(value::format_int64(winner)));
        Ok(())
    }

    /// Writes the smaller of the current `bigint` value and `candidate`.
    pub fn set_min_bigint(
        &mut self,
        ord: u64,
        key: &str,
        candidate: &BigInt,
    ) -> Result<(), StoreError> {
        self.check_numeric(UpdatePolicy::Min, ValueType::BigInt, "set_min_bigint")?;
        self.check_key(key)?;
        let winner = match self.parse_current(key, "bigint", value::parse_bigint)? {
            Some(current) if current <= *candidate => current,
            _ => candidate.clone(),
        };
        self.record(ord, key, Some(value::format_bigint(&winner)));
        Ok(())
    }

    /// Writes the smaller of the current `float64` value and `candidate`.
    pub fn set_min_float64(
        &mut self,
        ord: u64,
        key: &str,
        candidate: f64,
    ) -> Result<(), StoreError> {
        self.check_numeric(UpdatePolicy::Min, ValueType::Float64, "set_min_float64")?;
        self.check_key(key)?;
        let winner = match self.parse_current(key, "float64", value::parse_float64)? {
            Some(current) => current.min(candidate),
            None => candidate,
        };
        self.record(ord, key, Some(value::format_float64(winner)));
        Ok(())
    }

    /// Writes the smaller of the current `bigfloat` value and `candidate`.
    pub fn set_min_bigfloat(
        &mut self,
        ord: u64,
        key: &str,
        candidate: &BigDecimal,
    ) -> Result<(), StoreError> {
        self.check_numeric(UpdatePolicy::Min, ValueType::BigFloat, "set_min_bigfloat")?;
        self.check_key(key)?;
        let winner = match self.parse_current(key, "bigfloat", value::parse_bigfloat)? {
            Some(current) if current <= *candidate => current,
            _ => candidate.clone(),
        };
        self.record(ord, key, Some(value::format_bigfloat(&winner)));
        Ok(())
    }

    /// Writes the larger of the current `int64` value and `candidate`;
    /// missing keys take the candidate. Always records a delta carrying the
    /// winning value.
    pub fn set_max_int64(&mut self, ord: u64, key: &str, candidate: i64) -> Result<(), StoreError> {
        self.check_numeric(UpdatePolicy::Max, ValueType::Int64, "set_max_int64")?;
        self.check_key(key)?;
        let winner = match self.parse_current(key, "int64", value::parse_int64)? {
            Some(current) => current.max(candidate),
            None => candidate,
        };
        self.record(ord, key, Some(value::format_int64(winner)));
        Ok(())
    }

    /// Writes the larger of the current `bigint` value and `candidate`.
    pub fn set_max_bigint(
        &mut self,
        ord: u64,
        key: &str,
        candidate: &BigInt,
    ) -> Result<(), StoreError> {
        self.check_numeric(UpdatePolicy::Max, ValueType::BigInt, "set_max_bigint")?;
        self.check_key(key)?;
        let winner = match self.parse_current(key, "bigint", value::parse_bigint)? {
            Some(current) if current >= *candidate => current,
            _ => candidate.clone(),
        };
        self.record(ord, key, Some(value::format_bigint(&winner)));
        Ok(())
    }

    /// Writes the larger of the current `float64` value and `candidate`.
    pub fn set_max_float64(
        &mut self,
        ord: u64,
        key: &str,
        candidate: f64,
    ) -> Result<(), StoreError> {
        self.check_numeric(UpdatePolicy::Max, ValueType::Float64, "set_max_float64")?;
        self.check_key(key)?;
        let winner = match self.parse_current(key, "float64", value::parse_float64)? {
            Some(current) => current.max(candidate),
            None => candidate,
        };
        self.record(ord, key, Some(value::format_float64(winner)));
        Ok(())
    }

    /// Writes the larger of the current `bigfloat` value and `candidate`.
    pub fn set_max_bigfloat(
        &mut self,
        ord: u64,
        key: &str,
        candidate: &BigDecimal,
    ) -> Result<(), StoreError> {
        self.check_numeric(UpdatePolicy::Max, ValueType::BigFloat, "set_max_bigfloat")?;
        self.check_key(key)?;
        let winner = match self.parse_current(key, "bigfloat", value::parse_bigfloat)? {
            Some(current) if current >= *candidate => current,
            _ => candidate.clone(),
        };
        self.record(ord, key, Some(value::format_bigfloat(&winner)));
        Ok(())
    }

    // --- deltas -----------------------------------------------------------

    /// Applies a single delta to `kv` without recording it. This is the
    /// replay path used when rehydrating from a cached delta stream.
    pub fn apply_delta(&mut self, delta: &StoreDelta) {
        if delta.operation == Operation::Delete as i32 {
            self.kv.remove(&delta.key);
        } else {
            self.kv.insert(delta.key.clone(), delta.new_value.clone());
        }
    }

    /// Replaces the journal with `deltas` and replays each of them in order.
    pub fn set_deltas(&mut self, deltas: Vec<StoreDelta>) {
        for delta in &deltas {
            self.apply_delta(delta);
        }
        self.last_ordinal = deltas.last().map(|d| d.ordinal).unwrap_or(0);
        self.deltas = deltas;
    }

    /// Drops the recorded deltas and resets the ordinal high-water mark.
    /// Called once the block's deltas have been persisted and streamed.
    pub fn clear_deltas(&mut self) {
        self.deltas.clear();
        self.last_ordinal = 0;
    }

    // --- squashing --------------------------------------------------------

    /// Merges `next`, the store image for the adjacent later range, into
    /// this one, combining values according to the update policy. Merging
    /// `[a,b)` then `[b,c)` equals merging `[a,c)` directly.
    pub fn merge(&mut self, next: &Store) -> Result<(), StoreError> {
        match self.config.update_policy {
            UpdatePolicy::Set => {
                for (k, v) in &next.kv {
                    self.kv.insert(k.clone(), v.clone());
                }
            }
            UpdatePolicy::SetIfNotExists => {
                for (k, v) in &next.kv {
                    self.kv.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
            UpdatePolicy::Append => {
                for (k, v) in &next.kv {
                    self.kv.entry(k.clone()).or_default().extend_from_slice(v);
                }
            }
            UpdatePolicy::Add => {
                for (k, v) in &next.kv {
                    let combined = match self.kv.get(k) {
                        Some(prev) => self.combine_add(k, prev, v)?,
                        None => v.clone(),
                    };
                    self.kv.insert(k.clone(), combined);
                }
            }
            UpdatePolicy::Min | UpdatePolicy::Max => {
                let keep_max = self.config.update_policy == UpdatePolicy::Max;
                for (k, v) in &next.kv {
                    let winner = match self.kv.get(k) {
                        Some(prev) => self.combine_extremum(k, prev, v, keep_max)?,
                        None => v.clone(),
                    };
                    self.kv.insert(k.clone(), winner);
                }
            }
        }
        debug!(
            target: "store",
            store = %self.config.name,
            keys = self.kv.len(),
            "merged adjacent partial"
        );
        Ok(())
    }

    // --- persistence ------------------------------------------------------

    /// Writes the full `kv` as the complete snapshot
    /// `[module_initial_block, exclusive_end_block)`.
    pub async fn write_snapshot(&self, exclusive_end_block: u64) -> Result<String, StoreError> {
        let range = BlockRange::new(self.config.module_initial_block, exclusive_end_block);
        self.write_state_file(StateFile { range, partial: false }).await
    }

    /// Writes the full `kv` as the partial file covering `range`. Partials
    /// are written once and never mutated: an existing object wins.
    pub async fn write_partial(&self, range: BlockRange) -> Result<String, StoreError> {
        let file = StateFile { range, partial: true };
        let name = snapshot::state_file_name(&self.config.module_hash, &file);
        let exists =
            retry_transient(RetryPolicy::default(), "probe state file", || {
                self.storage.exists(&name)
            })
            .await?;
        if exists {
            return Ok(name);
        }
        self.write_state_file(file).await
    }

    async fn write_state_file(&self, file: StateFile) -> Result<String, StoreError> {
        let name = snapshot::state_file_name(&self.config.module_hash, &file);
        let content = snapshot::encode_kv(&self.kv);
        retry_transient(RetryPolicy::default(), "write state file", || {
            self.storage.put(&name, content.clone())
        })
        .await?;
        debug!(
            target: "store",
            store = %self.config.name,
            file = %name,
            keys = self.kv.len(),
            "wrote state file"
        );
        Ok(name)
    }

    /// Replaces `kv` with the contents of the given state file.
    pub async fn load(&mut self, file: &StateFile) -> Result<(), StoreError> {
        let name = snapshot::state_file_name(&self.config.module_hash, file);
        let content =
            retry_transient(RetryPolicy::default(), "read state file", || {
                self.storage.read(&name)
            })
            .await?;
        self.kv = snapshot::decode_kv(&content)
            .map_err(|reason| StoreError::SnapshotCorrupt { name: name.clone(), reason })?;
        trace!(target: "store", store = %self.config.name, file = %name, "loaded state file");
        Ok(())
    }

    // --- internals --------------------------------------------------------

    /// Records exactly one delta for the mutation of `key` and applies it,
    /// advancing the ordinal high-water mark. `None` deletes the key; a
    /// delete of a missing key records nothing.
    fn record(&mut self, ord: u64, key: &str, new_value: Option<Vec<u8>>) {
        let old = self.kv.get(key);
        let (operation, old_value, new_value) = match (old, new_value) {
            (None, Some(new)) => (Operation::Create, Vec::new(), new),
            (Some(old), Some(new)) => (Operation::Update, old.clone(), new),
            (Some(old), None) => (Operation::Delete, old.clone(), Vec::new()),
            (None, None) => return,
        };

        if operation == Operation::Delete {
            self.kv.remove(key);
        } else {
            self.kv.insert(key.to_owned(), new_value.clone());
        }
        self.deltas.push(StoreDelta {
            operation: operation as i32,
            ordinal: ord,
            key: key.to_owned(),
            old_value,
            new_value,
        });
        self.last_ordinal = ord;
    }

    fn check_policy(
        &self,
        expected: UpdatePolicy,
        operation: &'static str,
    ) -> Result<(), StoreError> {
        if self.config.update_policy != expected {
            return Err(StoreError::PolicyViolation {
                store: self.config.name.clone(),
                operation,
                policy: self.config.update_policy,
            });
        }
        Ok(())
    }

    fn check_numeric(
        &self,
        expected_policy: UpdatePolicy,
        expected_type: ValueType,
        operation: &'static str,
    ) -> Result<(), StoreError> {
        self.check_policy(expected_policy, operation)?;
        if self.config.value_type != expected_type {
            return Err(StoreError::ValueTypeMismatch {
                store: self.config.name.clone(),
                operation,
                value_type: value_type_name(self.config.value_type),
            });
        }
        Ok(())
    }

    fn check_key(&self, key: &str) -> Result<(), StoreError> {
        if key.len() > MAX_KEY_SIZE {
            return Err(StoreError::KeyTooLarge {
                store: self.config.name.clone(),
                size: key.len(),
                max: MAX_KEY_SIZE,
            });
        }
        Ok(())
    }

    fn parse_current<T>(
        &self,
        key: &str,
        value_type: &'static str,
        parse: impl FnOnce(&[u8]) -> Option<T>,
    ) -> Result<Option<T>, StoreError> {
        match self.kv.get(key) {
            None => Ok(None),
            Some(raw) => parse(raw).map(Some).ok_or_else(|| StoreError::InvalidValue {
                store: self.config.name.clone(),
                key: key.to_owned(),
                value_type,
            }),
        }
    }

    fn combine_add(&self, key: &str, a: &[u8], b: &[u8]) -> Result<Vec<u8>, StoreError> {
        Ok(match self.config.value_type {
            ValueType::Int64 => {
                let sum = self.parse_merge(key, "int64", a, value::parse_int64)?.wrapping_add(
                    self.parse_merge(key, "int64", b, value::parse_int64)?,
                );
                value::format_int64(sum)
            }
            ValueType::BigInt => {
                let sum = self.parse_merge(key, "bigint", a, value::parse_bigint)? +
                    self.parse_merge(key, "bigint", b, value::parse_bigint)?;
                value::format_bigint(&sum)
            }
            ValueType::Float64 => {
                let sum = self.parse_merge(key, "float64", a, value::parse_float64)? +
                    self.parse_merge(key, "float64", b, value::parse_float64)?;
                value::format_float64(sum)
            }
            ValueType::BigFloat => {
                let sum = self.parse_merge(key, "bigfloat", a, value::parse_bigfloat)? +
                    self.parse_merge(key, "bigfloat", b, value::parse_bigfloat)?;
                value::format_bigfloat(&sum)
            }
            ValueType::Bytes | ValueType::String => {
                return Err(StoreError::ValueTypeMismatch {
                    store: self.config.name.clone(),
                    operation: "merge add",
                    value_type: value_type_name(self.config.value_type),
                })
            }
        })
    }

    fn combine_extremum(
        &self,
        key: &str,
        prev: &[u8],
        next: &[u8],
        keep_max: bool,
    ) -> Result<Vec<u8>, StoreError> {
        let next_wins = match self.config.value_type {
            ValueType::Int64 => {
                let p = self.parse_merge(key, "int64", prev, value::parse_int64)?;
                let n = self.parse_merge(key, "int64", next, value::parse_int64)?;
                (n > p) == keep_max && n != p
            }
            ValueType::BigInt => {
                let p = self.parse_merge(key, "bigint", prev, value::parse_bigint)?;
                let n = self.parse_merge(key, "bigint", next, value::parse_bigint)?;
                (n > p) == keep_max && n != p
            }
            ValueType::Float64 => {
                let p = self.parse_merge(key, "float64", prev, value::parse_float64)?;
                let n = self.parse_merge(key, "float64", next, value::parse_float64)?;
                (n > p) == keep_max && n != p
            }
            ValueType::BigFloat => {
                let p = self.parse_merge(key, "bigfloat", prev, value::parse_bigfloat)?;
                let n = self.parse_merge(key, "bigfloat", next, value::parse_bigfloat)?;
                (n > p) == keep_max && n != p
            }
            ValueType::Bytes | ValueType::String => {
                return Err(StoreError::ValueTypeMismatch {
                    store: self.config.name.clone(),
                    operation: "merge min/max",
                    value_type: value_type_name(self.config.value_type),
                })
            }
        };
        Ok(if next_wins { next.to_vec() } else { prev.to_vec() })
    }

    fn parse_merge<T>(
        &self,
        key: &str,
        value_type: &'static str,
        raw: &[u8],
        parse: impl FnOnce(&[u8]) -> Option<T>,
    ) -> Result<T, StoreError> {
        parse(raw).ok_or_else(|| StoreError::InvalidValue {
            store: self.config.name.clone(),
            key: key.to_owned(),
            value_type,
        })
    }

    #[cfg(test)]
    pub(crate) fn kv_mut(&mut self) -> &mut HashMap<String, Vec<u8>> {
        &mut self.kv
    }
}

const fn value_type_name(vt: ValueType) -> &'static str {
    match vt {
        ValueType::Bytes => "bytes",
        ValueType::String => "string",
        ValueType::Int64 => "int64",
        ValueType::BigInt => "bigint",
        ValueType::Float64 => "float64",
        ValueType::BigFloat => "bigfloat",
    }
}
