use crate::{ExecutorError, ExecutorErrorKind};
use bytes::Bytes;
use prost::Message;
use std::{collections::HashMap, sync::Arc};
use tracing::trace;
use tributary_cache::OutputCache;
use tributary_pb::v1::{module_output, ModuleOutput, StoreDeltas};
use tributary_primitives::{Clock, Cursor};
use tributary_store::StoreHandle;
use tributary_wasm::{Input as WasmInput, WasmInstance, WasmModule};

/// How one declared module input is bound at each block.
pub(crate) enum InputBinding {
    /// Bytes resolved from the per-block `values` map: a source feed or an
    /// upstream mapper's output.
    Value {
        name: String,
    },
    /// Read handle to an upstream store (`get` mode).
    StoreGet {
        handle: StoreHandle,
    },
    /// The per-block delta list of an upstream store (`deltas` mode),
    /// passed to the guest as encoded bytes.
    StoreDeltas {
        handle: StoreHandle,
    },
}

/// State shared by both executor variants: identity, input bindings, the
/// module's cache namespace and the logs of the most recent execution.
pub(crate) struct BaseExecutor {
    pub(crate) module_name: String,
    pub(crate) initial_block: u64,
    pub(crate) wasm_module: Arc<WasmModule>,
    pub(crate) inputs: Vec<InputBinding>,
    pub(crate) cache: OutputCache,
    pub(crate) is_output: bool,
    logs: Vec<String>,
    logs_truncated: bool,
}

impl BaseExecutor {
    pub(crate) fn new(
        module_name: String,
        initial_block: u64,
        wasm_module: Arc<WasmModule>,
        inputs: Vec<InputBinding>,
        cache: OutputCache,
        is_output: bool,
    ) -> Self {
        Self {
            module_name,
            initial_block,
            wasm_module,
            inputs,
            cache,
            is_output,
            logs: Vec::new(),
            logs_truncated: false,
        }
    }

    /// Builds the guest input list for this block. The second return is the
    /// skip predicate: `false` when every byte input is empty and no store
    /// is bound in `get` mode, in which case execution is elided entirely.
    fn bind_inputs(
        &self,
        values: &HashMap<String, Bytes>,
    ) -> Result<(Vec<WasmInput>, bool), ExecutorError> {
        let mut wasm_inputs = Vec::with_capacity(self.inputs.len());
        let mut has_input = false;
        for binding in &self.inputs {
            match binding {
                InputBinding::Value { name } => {
                    let bytes = values.get(name).cloned().unwrap_or_default();
                    has_input |= !bytes.is_empty();
                    wasm_inputs
                        .push(WasmInput::Data { name: name.clone(), bytes: bytes.to_vec() });
                }
                InputBinding::StoreGet { handle } => {
                    has_input = true;
                    wasm_inputs.push(WasmInput::Store {
                        name: handle.read().name().to_owned(),
                        reader: Arc::new(handle.clone()),
                    });
                }
                InputBinding::StoreDeltas { handle } => {
                    let store = handle.read();
                    let deltas = StoreDeltas { deltas: store.deltas().to_vec() };
                    let bytes = deltas.encode_to_vec();
                    has_input |= !bytes.is_empty();
                    wasm_inputs
                        .push(WasmInput::Data { name: store.name().to_owned(), bytes });
                }
            }
        }
        Ok((wasm_inputs, has_input))
    }

    /// Creates an instance, runs the guest and captures its logs. The heap
    /// is cleared on success; on failure the error carries the log tail.
    fn execute(
        &mut self,
        clock: &Clock,
        inputs: Vec<WasmInput>,
    ) -> Result<WasmInstance, ExecutorError> {
        let mut instance = self
            .wasm_module
            .new_instance(clock, inputs)
            .map_err(|err| self.error(clock, err.into()))?;

        let result = instance.execute();
        self.logs = instance.take_logs();
        self.logs_truncated = instance.logs_truncated();

        match result {
            Ok(()) => {
                instance.clear_heap().map_err(|err| self.error(clock, err.into()))?;
                Ok(instance)
            }
            Err(err) => Err(self.error(clock, err.into())),
        }
    }

    fn error(&self, clock: &Clock, source: ExecutorErrorKind) -> ExecutorError {
        ExecutorError {
            block: clock.number,
            module: self.module_name.clone(),
            source,
            logs: self.logs.clone(),
        }
    }

    fn reset(&mut self) {
        self.logs.clear();
        self.logs_truncated = false;
    }
}

/// Executor for a mapper module.
pub(crate) struct MapperExecutor {
    pub(crate) base: BaseExecutor,
    mapper_output: Bytes,
}

impl MapperExecutor {
    pub(crate) fn new(base: BaseExecutor) -> Self {
        Self { base, mapper_output: Bytes::new() }
    }

    fn run(
        &mut self,
        values: &mut HashMap<String, Bytes>,
        clock: &Clock,
        cursor: &Cursor,
    ) -> Result<(), ExecutorError> {
        if clock.number < self.base.initial_block {
            values.insert(self.base.module_name.clone(), Bytes::new());
            return Ok(());
        }

        if let Some(payload) = self.base.cache.get(clock) {
            trace!(target: "pipeline::executor", module = %self.base.module_name, block = clock.number, "cache hit");
            values.insert(self.base.module_name.clone(), payload.clone());
            self.mapper_output = payload;
            return Ok(());
        }

        let (inputs, has_input) = self.base.bind_inputs(values)?;
        let output = if has_input {
            let instance = self.base.execute(clock, inputs)?;
            Bytes::from(instance.output().unwrap_or_default().to_vec())
        } else {
            // Every byte input is empty and no store is readable: a no-op
            // block costs nothing.
            Bytes::new()
        };

        values.insert(self.base.module_name.clone(), output.clone());
        self.mapper_output = output.clone();
        self.base.cache.set(clock, cursor, output);
        Ok(())
    }
}

/// Executor for a store module.
pub(crate) struct StoreExecutor {
    pub(crate) base: BaseExecutor,
    pub(crate) store: StoreHandle,
}

impl StoreExecutor {
    pub(crate) fn new(base: BaseExecutor, store: StoreHandle) -> Self {
        Self { base, store }
    }

    fn run(
        &mut self,
        values: &mut HashMap<String, Bytes>,
        clock: &Clock,
        cursor: &Cursor,
    ) -> Result<(), ExecutorError> {
        if clock.number < self.base.initial_block {
            return Ok(());
        }

        if let Some(payload) = self.base.cache.get(clock) {
            trace!(target: "pipeline::executor", module = %self.base.module_name, block = clock.number, "cache hit");
            let deltas = StoreDeltas::decode(payload.as_ref())
                .map_err(|err| self.base.error(clock, err.into()))?;
            self.store.write().set_deltas(deltas.deltas);
            return Ok(());
        }

        let (mut inputs, has_input) = self.base.bind_inputs(values)?;
        if has_input {
            inputs.push(WasmInput::OutputStore { store: self.store.clone() });
            self.base.execute(clock, inputs)?;
        }

        let deltas = StoreDeltas { deltas: self.store.read().deltas().to_vec() };
        self.base.cache.set(clock, cursor, deltas.encode_to_vec().into());
        Ok(())
    }
}

/// A module executor: the tagged variant the pipeline dispatches on.
pub(crate) enum ModuleExecutor {
    Mapper(MapperExecutor),
    Store(StoreExecutor),
}

impl ModuleExecutor {
    pub(crate) fn base(&self) -> &BaseExecutor {
        match self {
            Self::Mapper(e) => &e.base,
            Self::Store(e) => &e.base,
        }
    }

    pub(crate) fn base_mut(&mut self) -> &mut BaseExecutor {
        match self {
            Self::Mapper(e) => &mut e.base,
            Self::Store(e) => &mut e.base,
        }
    }

    /// Positions the module's cache for `block`, loading a sealed chunk when
    /// one exists.
    pub(crate) async fn position(&mut self, block: u64) -> Result<bool, ExecutorError> {
        let base = self.base_mut();
        base.cache.position_at(block).await.map_err(|err| ExecutorError {
            block,
            module: base.module_name.clone(),
            source: err.into(),
            logs: Vec::new(),
        })
    }

    /// Returns `true` when `block` is covered by a previously sealed chunk,
    /// meaning this executor can serve it without source data.
    pub(crate) fn covers(&self, block: u64) -> bool {
        block < self.base().initial_block || self.base().cache.covers(block)
    }

    /// Runs the module for one block.
    pub(crate) fn run(
        &mut self,
        values: &mut HashMap<String, Bytes>,
        clock: &Clock,
        cursor: &Cursor,
    ) -> Result<(), ExecutorError> {
        self.base_mut().reset();
        match self {
            Self::Mapper(e) => e.run(values, clock, cursor),
            Self::Store(e) => e.run(values, clock, cursor),
        }
    }

    /// Seals the module's current cache chunk.
    pub(crate) async fn save_cache(&mut self, boundary: u64) -> Result<(), ExecutorError> {
        let base = self.base_mut();
        base.cache.save().await.map_err(|err| ExecutorError {
            block: boundary,
            module: base.module_name.clone(),
            source: err.into(),
            logs: Vec::new(),
        })
    }

    /// The module's contribution to the block's streamed output, if it is a
    /// requested output and produced anything.
    pub(crate) fn module_output(&self) -> Option<ModuleOutput> {
        let base = self.base();
        if !base.is_output {
            return None;
        }
        let data = match self {
            Self::Mapper(e) => {
                if e.mapper_output.is_empty() && base.logs.is_empty() {
                    return None;
                }
                module_output::Data::MapOutput(e.mapper_output.to_vec())
            }
            Self::Store(e) => {
                let deltas = e.store.read().deltas().to_vec();
                if deltas.is_empty() && base.logs.is_empty() {
                    return None;
                }
                module_output::Data::StoreDeltas(StoreDeltas { deltas })
            }
        };
        Some(ModuleOutput {
            name: base.module_name.clone(),
            logs: base.logs.clone(),
            logs_truncated: base.logs_truncated,
            data: Some(data),
        })
    }
}
