//! Block-level orchestration of module executors.
//!
//! The [`Pipeline`] owns one executor per module of the graph and drives
//! them block by block in topological order, threading mapper outputs into
//! dependents, memoizing everything through the output cache, and sealing
//! store snapshots and cache chunks at save-interval boundaries. Legs whose
//! outputs are fully cached replay from storage without touching the block
//! source.

mod error;
mod event;
mod executor;
mod pipeline;
mod source;

pub use error::{ExecutorError, ExecutorErrorKind, PipelineError};
pub use event::{EventSender, PipelineEvent};
pub use pipeline::{Pipeline, PipelineConfig, PipelineMode, CLOCK_INPUT};
pub use source::{BlockSource, BlockStream, SourceError, SourcedBlock, TestBlocks};

#[cfg(test)]
mod tests;
