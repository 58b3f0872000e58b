use crate::BlockNumber;
use std::fmt;

/// Identifies the block currently being processed.
///
/// The clock is the only temporal input a module ever sees: block number,
/// the source's opaque block id, and the block timestamp in seconds since
/// the Unix epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Clock {
    /// Monotonically increasing block height.
    pub number: BlockNumber,
    /// Opaque block identifier assigned by the source.
    pub id: String,
    /// Block timestamp, seconds since the Unix epoch.
    pub timestamp: u64,
}

impl Clock {
    /// Creates a clock for the given height with an empty id.
    pub fn with_number(number: BlockNumber) -> Self {
        Self { number, ..Default::default() }
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.id)
    }
}

/// Opaque resume token handed out by the block source.
///
/// The engine never inspects cursors, it only persists the one observed at
/// chunk seal time so an interrupted stream can resume where it left off.
pub type Cursor = String;
