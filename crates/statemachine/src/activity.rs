//! Leader-side activity records.
//!
//! When the consensus host reports that this replica leads, every applied
//! entry produces an [`ActivityEvent`]. Events are always logged and, if a
//! sender is attached, also published on an unbounded channel so operators
//! can watch replication in real time.

use crate::command::CommandKind;
use crate::outcome::Status;
use common::LogPosition;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Record of one entry applied while leading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivityEvent {
    /// `None` when the entry payload did not decode.
    pub kind: Option<CommandKind>,
    pub index: u64,
    pub term: u64,
    pub status: Status,
}

impl ActivityEvent {
    pub fn new(position: LogPosition, kind: Option<CommandKind>, status: Status) -> Self {
        Self {
            kind,
            index: position.index,
            term: position.term,
            status,
        }
    }

    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.term, self.index)
    }
}

impl fmt::Display for ActivityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "{kind}")?,
            None => f.write_str("MALFORMED")?,
        }
        write!(f, " @{} -> {}", self.position(), self.status)
    }
}

/// Sender for activity events.
pub type ActivitySender = Arc<mpsc::UnboundedSender<ActivityEvent>>;

/// Receiver for activity events.
pub type ActivityReceiver = mpsc::UnboundedReceiver<ActivityEvent>;

/// Create a new activity event channel.
pub fn activity_channel() -> (ActivitySender, ActivityReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(tx), rx)
}
