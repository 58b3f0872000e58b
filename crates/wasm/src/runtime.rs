use crate::WasmError;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use wasmtime::{Config, Engine};

/// The shared WebAssembly runtime.
///
/// One runtime serves every module of an engine instance: compiled modules
/// are immutable and shared, per-block instances each get their own store.
/// The configuration links no WASI, clocks or randomness, and arms epoch
/// interruption so cancellation can stop guest code within bounded time.
#[derive(Clone)]
pub struct WasmRuntime {
    engine: Engine,
    interrupted: Arc<AtomicBool>,
}

impl std::fmt::Debug for WasmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmRuntime")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

impl WasmRuntime {
    /// Builds the runtime.
    pub fn new() -> Result<Self, WasmError> {
        let mut config = Config::new();
        config.epoch_interruption(true);
        config.wasm_threads(false);
        let engine = Engine::new(&config).map_err(|err| WasmError::Instantiation {
            module: "<engine>".to_owned(),
            reason: format!("{err:#}"),
        })?;
        Ok(Self { engine, interrupted: Arc::new(AtomicBool::new(false)) })
    }

    /// The underlying engine, used to compile modules.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Interrupts all in-flight guest executions: currently-running code
    /// traps at its next epoch check and host functions refuse re-entry.
    /// No guest code runs after the in-flight traps unwind.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.engine.increment_epoch();
    }

    /// Returns `true` once [`interrupt`](Self::interrupt) has been called.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub(crate) fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }
}
