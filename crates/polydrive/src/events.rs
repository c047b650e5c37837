use crate::apply::{ApplyObserver, OpOutcome};
use crate::error::ErrorCode;
use polylog::Node;
use tokio::sync::broadcast;

/// Notifications published by a drive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveEvent {
    /// The view advanced to `version`
    Update { version: u64 },
    /// A write to `path` was parked as a conflict
    Conflict { path: String },
    /// An operation from the log was dropped
    Error {
        code: Option<ErrorCode>,
        message: String,
    },
}

/// Publishes merge outcomes on the drive's event channel
pub(crate) struct EventObserver {
    events: broadcast::Sender<DriveEvent>,
}

impl EventObserver {
    pub(crate) fn new(events: broadcast::Sender<DriveEvent>) -> Self {
        Self { events }
    }
}

impl ApplyObserver for EventObserver {
    fn observe(&self, _node: &Node, outcome: &OpOutcome) {
        let event = match outcome {
            OpOutcome::Applied | OpOutcome::Ignored => return,
            OpOutcome::Conflict { path } => DriveEvent::Conflict { path: path.clone() },
            OpOutcome::Rejected(e) => DriveEvent::Error {
                code: e.code(),
                message: e.to_string(),
            },
        };
        // nobody listening is fine
        _ = self.events.send(event);
    }
}
