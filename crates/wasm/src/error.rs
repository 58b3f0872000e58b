use tributary_store::StoreError;

/// A structured panic reported by the guest through `register_panic`.
#[derive(Debug, Clone, Default)]
pub struct PanicInfo {
    /// Panic message.
    pub message: String,
    /// Source file inside the guest, when known.
    pub file: String,
    /// Line inside `file`.
    pub line: u32,
    /// Column inside `file`.
    pub column: u32,
}

impl std::fmt::Display for PanicInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.file.is_empty() {
            write!(f, " at {}:{}:{}", self.file, self.line, self.column)?;
        }
        Ok(())
    }
}

/// Errors produced while loading or executing guest code.
#[derive(Debug, thiserror::Error)]
pub enum WasmError {
    /// The guest module failed to compile or instantiate.
    #[error("instantiating module {module}: {reason}")]
    Instantiation {
        /// Module name.
        module: String,
        /// Compiler or linker detail.
        reason: String,
    },
    /// The guest is missing a required export (`memory`, `alloc`, `dealloc`
    /// or the entry point).
    #[error("module {module} is missing required export {export:?}")]
    MissingExport {
        /// Module name.
        module: String,
        /// Name of the missing export.
        export: String,
    },
    /// The guest panicked and reported it through `register_panic`.
    #[error("wasm panic in module {module}: {panic}")]
    Panic {
        /// Module name.
        module: String,
        /// Structured panic payload.
        panic: PanicInfo,
    },
    /// The guest trapped without registering a panic: unreachable code, out
    /// of bounds access, stack exhaustion.
    #[error("wasm trap in module {module}: {reason}")]
    Trap {
        /// Module name.
        module: String,
        /// Trap detail from the runtime.
        reason: String,
    },
    /// A host function touched guest memory out of bounds.
    #[error("module {module}: invalid guest memory access: {reason}")]
    Memory {
        /// Module name.
        module: String,
        /// Access detail.
        reason: String,
    },
    /// A store operation issued by the guest failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Execution was interrupted by cancellation.
    #[error("wasm execution cancelled")]
    Cancelled,
}
