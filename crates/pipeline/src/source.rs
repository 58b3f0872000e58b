use bytes::Bytes;
use futures_util::Stream;
use std::{collections::HashMap, pin::Pin};
use tributary_primitives::{BlockRange, Clock, Cursor};

/// One block delivered by the source: its clock, the resume cursor observed
/// with it, and the raw bytes of every source feed, keyed by feed name.
#[derive(Debug, Clone, Default)]
pub struct SourcedBlock {
    /// Block identity.
    pub clock: Clock,
    /// Opaque resume token as of this block.
    pub cursor: Cursor,
    /// Source feed payloads, e.g. `sf.blocks` → block bytes.
    pub payloads: HashMap<String, Bytes>,
}

/// Errors surfaced by a block source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The source connection failed.
    #[error("block source unavailable: {0}")]
    Unavailable(String),
    /// The source delivered a malformed block.
    #[error("block source delivered an invalid block: {0}")]
    InvalidBlock(String),
}

/// An ordered stream of blocks for one range.
pub type BlockStream = Pin<Box<dyn Stream<Item = Result<SourcedBlock, SourceError>> + Send>>;

/// The block-source contract the pipeline consumes.
///
/// Implementations stream blocks strictly ordered by height with no gaps;
/// the engine treats a skipped height as fatal. The pipeline opens one
/// stream per uncovered leg, which is what lets fully-cached legs skip the
/// source entirely.
#[async_trait::async_trait]
pub trait BlockSource: Send + Sync {
    /// Opens a stream covering `range`.
    async fn blocks(&self, range: BlockRange) -> Result<BlockStream, SourceError>;
}

/// Deterministic in-process source for tests and local development: block
/// `n` carries id `block-n`, timestamp `n` and a single `sf.blocks` payload
/// derived from the height.
#[derive(Debug, Clone, Default)]
pub struct TestBlocks {
    feed: String,
}

impl TestBlocks {
    /// Creates a generator feeding `feed` (conventionally `sf.blocks`).
    pub fn new(feed: impl Into<String>) -> Self {
        Self { feed: feed.into() }
    }
}

#[async_trait::async_trait]
impl BlockSource for TestBlocks {
    async fn blocks(&self, range: BlockRange) -> Result<BlockStream, SourceError> {
        let feed = self.feed.clone();
        let iter = (range.start_block..range.exclusive_end_block).map(move |number| {
            let mut payloads = HashMap::new();
            payloads.insert(feed.clone(), Bytes::from(format!("payload-{number}")));
            Ok::<_, SourceError>(SourcedBlock {
                clock: Clock {
                    number,
                    id: format!("block-{number}"),
                    timestamp: number,
                },
                cursor: format!("cursor-{number}"),
                payloads,
            })
        });
        Ok(Box::pin(futures_util::stream::iter(iter)))
    }
}
