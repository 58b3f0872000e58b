use crate::{error::PanicInfo, WasmError};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tributary_primitives::Clock;
use tributary_store::{StoreHandle, StoreReader};
use wasmtime::{Instance, Memory, Store, TypedFunc, Val};

/// Upper bound on the bytes a single execution may log before the buffer is
/// truncated.
pub const MAX_LOG_BYTE_COUNT: u64 = 128 * 1024;

/// Host-side state of one instance, owned by the wasmtime store and visible
/// to every host function through the caller.
pub(crate) struct HostContext {
    pub(crate) module_name: String,
    pub(crate) clock: Clock,
    pub(crate) input_stores: Vec<Arc<dyn StoreReader>>,
    pub(crate) output_store: Option<StoreHandle>,
    pub(crate) output: Option<Vec<u8>>,
    pub(crate) logs: Vec<String>,
    pub(crate) logs_byte_count: u64,
    pub(crate) logs_truncated: bool,
    pub(crate) panic: Option<PanicInfo>,
    /// Typed error recorded by a host function just before it traps, so the
    /// executor surfaces the real failure rather than a generic trap.
    pub(crate) host_error: Option<WasmError>,
    pub(crate) interrupted: Arc<AtomicBool>,
}

impl HostContext {
    pub(crate) fn new(module_name: String, clock: Clock, interrupted: Arc<AtomicBool>) -> Self {
        Self {
            module_name,
            clock,
            input_stores: Vec::new(),
            output_store: None,
            output: None,
            logs: Vec::new(),
            logs_byte_count: 0,
            logs_truncated: false,
            panic: None,
            host_error: None,
            interrupted: Arc::clone(&interrupted),
        }
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

/// A single-use guest instance, created per module per block.
///
/// Holds the linear memory handle, the guest heap exports, the precomputed
/// entry point arguments and the host-visible context (logs, output buffer,
/// panic slot).
pub struct WasmInstance {
    module_name: String,
    entrypoint: String,
    store: Store<HostContext>,
    instance: Instance,
    memory: Memory,
    alloc: TypedFunc<u32, u32>,
    dealloc: TypedFunc<(u32, u32), ()>,
    /// Guest buffers owned by the host, deallocated by `clear_heap`.
    allocations: Vec<(u32, u32)>,
    args: Vec<Val>,
}

impl std::fmt::Debug for WasmInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmInstance")
            .field("module", &self.module_name)
            .field("entrypoint", &self.entrypoint)
            .field("args", &self.args.len())
            .finish()
    }
}

impl WasmInstance {
    pub(crate) fn bind(
        module_name: String,
        entrypoint: String,
        mut store: Store<HostContext>,
        instance: Instance,
    ) -> Result<Self, WasmError> {
        let missing = |export: &str| WasmError::MissingExport {
            module: module_name.clone(),
            export: export.to_owned(),
        };

        let memory = instance.get_memory(&mut store, "memory").ok_or_else(|| missing("memory"))?;
        let alloc = instance
            .get_typed_func::<u32, u32>(&mut store, "alloc")
            .map_err(|_| missing("alloc"))?;
        let dealloc = instance
            .get_typed_func::<(u32, u32), ()>(&mut store, "dealloc")
            .map_err(|_| missing("dealloc"))?;

        Ok(Self {
            module_name,
            entrypoint,
            store,
            instance,
            memory,
            alloc,
            dealloc,
            allocations: Vec::new(),
            args: Vec::new(),
        })
    }

    /// Writes `bytes` into guest memory through the guest allocator and
    /// tracks the buffer for deallocation after execution.
    pub(crate) fn write_input(&mut self, bytes: &[u8]) -> Result<(u32, u32), WasmError> {
        let len = bytes.len() as u32;
        let ptr = self
            .alloc
            .call(&mut self.store, len)
            .map_err(|err| self.memory_error(format!("guest alloc({len}) failed: {err:#}")))?;
        self.memory
            .write(&mut self.store, ptr as usize, bytes)
            .map_err(|err| self.memory_error(format!("writing input at {ptr}: {err}")))?;
        self.allocations.push((ptr, len));
        Ok((ptr, len))
    }

    pub(crate) fn register_input_store(&mut self, reader: Arc<dyn StoreReader>) -> usize {
        let stores = &mut self.store.data_mut().input_stores;
        stores.push(reader);
        stores.len() - 1
    }

    pub(crate) fn set_output_store(&mut self, store: StoreHandle) {
        self.store.data_mut().output_store = Some(store);
    }

    pub(crate) fn set_args(&mut self, args: Vec<Val>) {
        self.args = args;
    }

    /// Calls the guest entry point. A clean return is success; a trap is
    /// mapped to the typed error that caused it: a host-function failure, a
    /// registered guest panic, cancellation, or a raw trap.
    pub fn execute(&mut self) -> Result<(), WasmError> {
        let func = self
            .instance
            .get_func(&mut self.store, &self.entrypoint)
            .ok_or_else(|| WasmError::MissingExport {
                module: self.module_name.clone(),
                export: self.entrypoint.clone(),
            })?;

        match func.call(&mut self.store, &self.args, &mut []) {
            Ok(()) => {
                // A registered panic followed by a clean return is still a
                // failed execution.
                match self.store.data_mut().panic.take() {
                    Some(panic) => {
                        Err(WasmError::Panic { module: self.module_name.clone(), panic })
                    }
                    None => Ok(()),
                }
            }
            Err(err) => {
                let ctx = self.store.data_mut();
                if let Some(host_error) = ctx.host_error.take() {
                    return Err(host_error);
                }
                if let Some(panic) = ctx.panic.take() {
                    return Err(WasmError::Panic { module: self.module_name.clone(), panic });
                }
                if ctx.is_interrupted() {
                    return Err(WasmError::Cancelled);
                }
                Err(WasmError::Trap {
                    module: self.module_name.clone(),
                    // `{:?}` keeps the wasm backtrace wasmtime attaches.
                    reason: format!("{err:?}"),
                })
            }
        }
    }

    /// Output bytes recorded by the guest through `env.output`, if any.
    pub fn output(&self) -> Option<&[u8]> {
        self.store.data().output.as_deref()
    }

    /// Lines logged by the guest, up to the 128 KiB cap.
    pub fn logs(&self) -> &[String] {
        &self.store.data().logs
    }

    /// Returns `true` if the guest logged past the cap and lines were
    /// dropped.
    pub fn logs_truncated(&self) -> bool {
        self.store.data().logs_truncated
    }

    /// The clock this instance was created for.
    pub fn clock(&self) -> &Clock {
        &self.store.data().clock
    }

    /// Takes the accumulated logs, leaving the buffer empty.
    pub fn take_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.store.data_mut().logs)
    }

    /// Frees the guest buffers written by the host. Buffers handed to the
    /// guest through `state.get_*` out-parameters are owned by the guest and
    /// not touched.
    pub fn clear_heap(&mut self) -> Result<(), WasmError> {
        for (ptr, len) in std::mem::take(&mut self.allocations) {
            self.dealloc
                .call(&mut self.store, (ptr, len))
                .map_err(|err| self.memory_error(format!("guest dealloc({ptr}, {len}): {err:#}")))?;
        }
        Ok(())
    }

    fn memory_error(&self, reason: String) -> WasmError {
        WasmError::Memory { module: self.module_name.clone(), reason }
    }
}
