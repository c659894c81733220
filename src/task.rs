//! Task definitions

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-queue task identifier
pub type TaskId = u64;

/// Identifies one particular checkout of a task.
///
/// A task can be leased, redelivered and leased again under the same
/// `(queue, id)` pair, so redelivery timers are matched on this instead.
pub type LeaseId = Uuid;

/// An opaque work item.
///
/// Tasks are immutable once admitted. Redelivery hands back the very same
/// record, so id, declared length and payload survive any number of leases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Queue the task was added to
    pub queue: String,
    /// Declared payload length, echoed back verbatim on delivery
    pub length: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Identifier, unique within `queue` while the task is alive
    pub id: TaskId,
}

impl Task {
    /// Create a new task
    pub fn new(
        queue: impl Into<String>,
        length: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        id: TaskId,
    ) -> Self {
        Self {
            queue: queue.into(),
            length: length.into(),
            payload: payload.into(),
            id,
        }
    }

    /// Wire form used by `GET`: `<id> <length> <payload>`
    pub fn delivery_frame(&self) -> Vec<u8> {
        let head = format!("{} {} ", self.id, self.length);
        let mut frame = Vec::with_capacity(head.len() + self.payload.len());
        frame.extend_from_slice(head.as_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }
}
