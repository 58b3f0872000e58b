use crate::{
    host,
    instance::{HostContext, WasmInstance},
    WasmError, WasmRuntime,
};
use std::sync::Arc;
use tributary_primitives::Clock;
use tributary_store::{StoreHandle, StoreReader};
use wasmtime::{Store, Val};

/// One bound input of a module execution, in declaration order.
pub enum Input {
    /// A byte-string input: a source feed, an upstream mapper's output, or
    /// an upstream store's encoded delta list. Passed to the entry point as
    /// a `(ptr, len)` pair after being written into guest memory.
    Data {
        /// Input name, for diagnostics.
        name: String,
        /// The bytes to hand to the guest.
        bytes: Vec<u8>,
    },
    /// A store handle bound in `get` mode. Passed to the entry point as the
    /// index the guest uses in `state.get_*` calls.
    Store {
        /// Upstream store module name, for diagnostics.
        name: String,
        /// Read access to the upstream store.
        reader: Arc<dyn StoreReader>,
    },
    /// The store this module writes. Not passed as an argument: `state.set`
    /// and friends implicitly target it.
    OutputStore {
        /// Write access to the module's own store.
        store: StoreHandle,
    },
}

impl std::fmt::Debug for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data { name, bytes } => {
                f.debug_struct("Data").field("name", name).field("len", &bytes.len()).finish()
            }
            Self::Store { name, .. } => f.debug_struct("Store").field("name", name).finish(),
            Self::OutputStore { .. } => f.debug_struct("OutputStore").finish(),
        }
    }
}

/// A compiled guest module, shared across every block and worker.
pub struct WasmModule {
    runtime: WasmRuntime,
    module: wasmtime::Module,
    name: String,
    entrypoint: String,
}

impl std::fmt::Debug for WasmModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmModule")
            .field("name", &self.name)
            .field("entrypoint", &self.entrypoint)
            .finish()
    }
}

impl WasmModule {
    /// Compiles `code` (binary or WAT) once; instances are created per block
    /// from the compiled artifact.
    pub fn compile(
        runtime: &WasmRuntime,
        name: impl Into<String>,
        entrypoint: impl Into<String>,
        code: &[u8],
    ) -> Result<Arc<Self>, WasmError> {
        let name = name.into();
        let module = wasmtime::Module::new(runtime.engine(), code).map_err(|err| {
            WasmError::Instantiation { module: name.clone(), reason: format!("{err:#}") }
        })?;
        Ok(Arc::new(Self {
            runtime: runtime.clone(),
            module,
            name,
            entrypoint: entrypoint.into(),
        }))
    }

    /// Module name, as declared in the graph.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates a fresh instance for one block: instantiates the guest,
    /// writes every byte input into its memory and precomputes the entry
    /// point arguments.
    pub fn new_instance(
        &self,
        clock: &Clock,
        inputs: Vec<Input>,
    ) -> Result<WasmInstance, WasmError> {
        let ctx = HostContext::new(self.name.clone(), clock.clone(), self.runtime.interrupt_flag());
        let mut store = Store::new(self.runtime.engine(), ctx);
        // Trap at the first epoch tick after `WasmRuntime::interrupt`.
        store.set_epoch_deadline(1);

        let linker = host::linker(self.runtime.engine())
            .map_err(|err| self.instantiation_error(&err))?;
        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(|err| self.instantiation_error(&err))?;

        let mut instance = WasmInstance::bind(self.name.clone(), self.entrypoint.clone(), store, instance)?;

        let mut args = Vec::with_capacity(inputs.len() * 2);
        for input in inputs {
            match input {
                Input::Data { bytes, .. } => {
                    let (ptr, len) = instance.write_input(&bytes)?;
                    args.push(Val::I32(ptr as i32));
                    args.push(Val::I32(len as i32));
                }
                Input::Store { reader, .. } => {
                    let idx = instance.register_input_store(reader);
                    args.push(Val::I32(idx as i32));
                }
                Input::OutputStore { store } => instance.set_output_store(store),
            }
        }
        instance.set_args(args);
        Ok(instance)
    }

    fn instantiation_error(&self, err: &wasmtime::Error) -> WasmError {
        WasmError::Instantiation { module: self.name.clone(), reason: format!("{err:#}") }
    }
}
