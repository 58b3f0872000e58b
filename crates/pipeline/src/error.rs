use crate::SourceError;
use tributary_cache::CacheError;
use tributary_primitives::GraphError;
use tributary_store::StoreError;
use tributary_wasm::WasmError;

/// Failure of one module execution, carried with enough context to be
/// surfaced to a user: the guest logs observed before the failure and the
/// execution stack when one exists.
#[derive(Debug, thiserror::Error)]
#[error("block {block}: module {module}: {source}")]
pub struct ExecutorError {
    /// Block being processed.
    pub block: u64,
    /// Module that failed.
    pub module: String,
    /// Underlying failure.
    #[source]
    pub source: ExecutorErrorKind,
    /// Tail of the guest log buffer at failure time.
    pub logs: Vec<String>,
}

impl ExecutorError {
    /// Formats the error the way it is surfaced to users: message first,
    /// then the stack-trace section which also carries the logs of the
    /// execution.
    pub fn render(&self) -> String {
        let mut out = self.to_string();
        if !self.logs.is_empty() {
            out.push_str("\n----- stack trace -----\n");
            for line in &self.logs {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

/// The failure modes of one module execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorErrorKind {
    /// Guest execution failed: trap, panic, or host-function error.
    #[error(transparent)]
    Wasm(#[from] WasmError),
    /// The cache rejected a read or write.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// A cached delta stream failed to decode.
    #[error("decoding cached deltas: {0}")]
    DeltaDecode(#[from] prost::DecodeError),
    /// A store operation outside guest execution failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A pipeline execution error.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The module graph failed validation.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// No WASM binary was provided for a module of the graph.
    #[error("no code provided for module {module}")]
    MissingModuleCode {
        /// The module without code.
        module: String,
    },
    /// A module descriptor is internally inconsistent.
    #[error("invalid module {module}: {reason}")]
    InvalidModule {
        /// The offending module.
        module: String,
        /// What is wrong with it.
        reason: String,
    },
    /// A module executor failed; the pipeline halts and surfaces the first
    /// such error.
    #[error(transparent)]
    Executor(Box<ExecutorError>),
    /// The block source failed.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// The block source skipped a height. The engine cannot reason about
    /// gaps, so this is fatal.
    #[error("block source skipped from {expected} to {got}")]
    SourceGap {
        /// Height the pipeline expected next.
        expected: u64,
        /// Height actually delivered.
        got: u64,
    },
    /// The source ended before the requested range was covered.
    #[error("block source ended at {stopped_at}, expected blocks up to {expected_end}")]
    SourceExhausted {
        /// First height that was not delivered.
        stopped_at: u64,
        /// Exclusive end of the requested range.
        expected_end: u64,
    },
    /// Loading or persisting state failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Sealing or loading a cache chunk failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// The WASM runtime could not be built or a module failed to compile.
    #[error(transparent)]
    Wasm(#[from] WasmError),
    /// The run was cancelled. In-flight work for the current block was
    /// discarded; everything sealed before the cancellation remains valid.
    #[error("pipeline cancelled")]
    Cancelled,
}

impl From<ExecutorError> for PipelineError {
    fn from(err: ExecutorError) -> Self {
        Self::Executor(Box::new(err))
    }
}
