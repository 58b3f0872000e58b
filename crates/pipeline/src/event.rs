use tokio::sync::mpsc::Sender;
use tributary_pb::v1::ModuleOutput;
use tributary_primitives::{Clock, Cursor};

/// Events streamed to pipeline subscribers.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Every module ran for one block; carries the outputs and logs of the
    /// modules marked as outputs.
    BlockProcessed {
        /// The block that was processed.
        clock: Clock,
        /// Resume cursor as of this block.
        cursor: Cursor,
        /// Module outputs, in execution order.
        outputs: Vec<ModuleOutput>,
    },
    /// A save-interval boundary was flushed: snapshots and cache chunks up
    /// to `boundary` are sealed on storage.
    IntervalSaved {
        /// Exclusive end of the sealed interval.
        boundary: u64,
    },
}

/// An optional event sender. Back-processing pipelines run without
/// subscribers; a missing or closed receiver never blocks the run loop.
#[derive(Debug, Clone, Default)]
pub struct EventSender(Option<Sender<PipelineEvent>>);

impl EventSender {
    /// A sender delivering to `tx`.
    pub fn new(tx: Sender<PipelineEvent>) -> Self {
        Self(Some(tx))
    }

    /// A sender that drops every event.
    pub fn disabled() -> Self {
        Self(None)
    }

    /// Delivers `event`, waiting for channel capacity. Send failures mean
    /// the subscriber went away, which is not the pipeline's problem.
    pub async fn send(&self, event: PipelineEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event).await;
        }
    }
}
