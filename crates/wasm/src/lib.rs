//! Sandboxed WebAssembly execution environment for tributary modules.
//!
//! Modules are compiled once into a shared [`WasmModule`]; every block gets
//! a fresh single-use [`WasmInstance`] with its own linear memory, input
//! bindings, log buffer and panic slot. The guest ABI (import modules
//! `state`, `logger` and `env`, plus the `alloc`/`dealloc`/`memory`
//! exports) is what the module SDKs compile against.

mod error;
mod host;
mod instance;
mod module;
mod runtime;

pub use error::{PanicInfo, WasmError};
pub use instance::{WasmInstance, MAX_LOG_BYTE_COUNT};
pub use module::{Input, WasmModule};
pub use runtime::WasmRuntime;

#[cfg(test)]
mod tests;
