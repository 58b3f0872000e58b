//! Back-processing planner, dispatcher and squasher.
//!
//! Given a request starting at a historical block, the [`Orchestrator`]
//! figures out which partial store ranges are missing, computes them
//! through parallel sub-requests against a [`Worker`], and squashes the
//! resulting partial files into the complete snapshots that the live
//! pipeline initializes from.

mod error;
mod scheduler;
mod squasher;
mod worker;
mod workplan;

pub use error::{OrchestratorError, WorkerError};
pub use scheduler::{Orchestrator, OrchestratorConfig};
pub use squasher::Squasher;
pub use worker::{LocalWorker, Worker};
pub use workplan::{maps_split_work, stores_split_work, WorkPlan, WorkUnit};

#[cfg(test)]
mod tests;
